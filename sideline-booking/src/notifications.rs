//! Transactional email templates. Each builder returns the outbox effect that sends it.

use chrono::{DateTime, Utc};
use sideline_core::booking::Booking;
use sideline_core::catalog::Coach;
use sideline_core::effects::SideEffect;

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// "75.00 USD"
pub fn format_amount(cents: i64, currency: &str) -> String {
    format!("{}.{:02} {}", cents / 100, (cents % 100).abs(), currency.to_uppercase())
}

fn format_deadline(deadline: DateTime<Utc>) -> String {
    deadline.format("%B %-d, %Y at %H:%M UTC").to_string()
}

fn email(to: &str, subject: String, paragraphs: &[String]) -> SideEffect {
    let html_body = paragraphs
        .iter()
        .map(|p| format!("<p>{}</p>", escape_html(p)))
        .collect::<Vec<_>>()
        .join("\n");
    SideEffect::SendEmail {
        to: to.to_string(),
        subject,
        html_body,
        text_body: paragraphs.join("\n\n"),
    }
}

pub fn payment_received(booking: &Booking, listing_title: &str) -> SideEffect {
    email(
        &booking.buyer_email,
        format!("Payment received for {}", listing_title),
        &[
            format!(
                "We received your payment of {} for {}.",
                format_amount(booking.amount_paid, &booking.currency),
                listing_title
            ),
            format!("Your booking reference is {}.", booking.id),
        ],
    )
}

pub fn new_review_request(coach: &Coach, booking: &Booking, listing_title: &str) -> SideEffect {
    email(
        &coach.email,
        format!("New film review request: {}", listing_title),
        &[
            format!("Hi {}, an athlete just booked {}.", coach.display_name, listing_title),
            "Accept or decline the request from your dashboard. The turnaround clock starts when you accept.".to_string(),
            format!("Booking reference: {}", booking.id),
        ],
    )
}

pub fn review_accepted(booking: &Booking, listing_title: &str, deadline: DateTime<Utc>) -> SideEffect {
    email(
        &booking.buyer_email,
        format!("Your coach accepted {}", listing_title),
        &[
            format!("Good news: your request for {} was accepted.", listing_title),
            format!("Expect your review by {}.", format_deadline(deadline)),
        ],
    )
}

pub fn review_declined(booking: &Booking, listing_title: &str) -> SideEffect {
    email(
        &booking.buyer_email,
        format!("Your request for {} was declined", listing_title),
        &[
            format!("The coach could not take on {} this time.", listing_title),
            format!(
                "A full refund of {} is on its way to your original payment method.",
                format_amount(booking.amount_paid, &booking.currency)
            ),
        ],
    )
}

pub fn review_delivered(booking: &Booking, listing_title: &str, review_url: &str) -> SideEffect {
    email(
        &booking.buyer_email,
        format!("Your film review is ready: {}", listing_title),
        &[
            format!("Your coach has delivered {}.", listing_title),
            format!("Watch it here: {}", review_url),
        ],
    )
}

pub fn review_expired_buyer(booking: &Booking, listing_title: &str) -> SideEffect {
    email(
        &booking.buyer_email,
        format!("Refund issued for {}", listing_title),
        &[
            format!("Your coach did not deliver {} before the deadline.", listing_title),
            format!(
                "We are refunding {} to your original payment method.",
                format_amount(booking.amount_paid, &booking.currency)
            ),
        ],
    )
}

pub fn review_expired_coach(coach: &Coach, booking: &Booking, listing_title: &str) -> SideEffect {
    email(
        &coach.email,
        format!("Missed deadline: {}", listing_title),
        &[
            format!(
                "Hi {}, the turnaround window for {} has passed and the athlete was refunded.",
                coach.display_name, listing_title
            ),
            format!("Booking reference: {}", booking.id),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(7500, "usd"), "75.00 USD");
        assert_eq!(format_amount(1999, "eur"), "19.99 EUR");
        assert_eq!(format_amount(5, "usd"), "0.05 USD");
    }

    #[test]
    fn test_html_body_is_escaped() {
        let effect = email("a@example.com", "Hi".to_string(), &["<b>Tom & Jerry</b>".to_string()]);
        match effect {
            SideEffect::SendEmail { html_body, text_body, .. } => {
                assert_eq!(html_body, "<p>&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;</p>");
                assert_eq!(text_body, "<b>Tom & Jerry</b>");
            }
            other => panic!("unexpected effect {:?}", other),
        }
    }
}
