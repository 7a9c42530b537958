use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sideline_core::booking::{Booking, FilmReviewState};
use sideline_core::catalog::{Coach, Listing, Profile};
use sideline_core::effects::{OutboxStatus, OutboxTask, SideEffect};
use sideline_core::repository::{
    AccountClaim, BookingRepository, CoachRepository, ConversationRepository, ListingRepository,
    OutboxRepository, ProfileRepository, ReviewRepository, WebhookLedger,
};
use sideline_core::review::{Rating, Review};
use sideline_core::webhook::WebhookEventRecord;
use sideline_core::{CoreError, CoreResult};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;
use uuid::Uuid;

/// How long a claimed outbox task stays invisible before another worker may pick it up
const CLAIM_LEASE_SECS: i64 = 300;

const BOOKING_COLUMNS: &str = "id, listing_id, coach_id, buyer_profile_id, buyer_email, booking_type, \
    amount_paid, platform_fee, currency, payment_status, review_status, turnaround_hours, accepted_at, \
    deadline_at, submitted_review_url, checkout_session_id, payment_intent_id, meeting_id, refund_id, \
    conversation_id, version, created_at, updated_at";

fn db_err(e: sqlx::Error) -> CoreError {
    CoreError::StoreError(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

/// Postgres implementation of every marketplace repository
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_booking_where(&self, clause: &str, value: &str) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE {} = $1 LIMIT 1", BOOKING_COLUMNS, clause);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn fetch_bookings(&self, sql: &str, at: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(sql)
            .bind(at)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(Booking::try_from).collect()
    }
}

async fn insert_effects(
    tx: &mut Transaction<'_, Postgres>,
    effects: &[SideEffect],
    now: DateTime<Utc>,
) -> CoreResult<()> {
    for effect in effects {
        let task = OutboxTask::new(effect.clone(), now);
        let payload = serde_json::to_value(&task.effect)
            .map_err(|e| CoreError::StoreError(format!("unserializable side effect: {}", e)))?;
        sqlx::query(
            "INSERT INTO outbox_tasks (id, kind, effect, status, attempts, available_at, created_at) \
             VALUES ($1, $2, $3, 'pending', 0, $4, $4)",
        )
        .bind(task.id)
        .bind(task.effect.kind())
        .bind(payload)
        .bind(now)
        .execute(&mut **tx)
        .await
        .map_err(db_err)?;
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    email: String,
    display_name: String,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile { id: row.id, email: row.email, display_name: row.display_name }
    }
}

#[derive(sqlx::FromRow)]
struct CoachRow {
    id: Uuid,
    profile_id: Uuid,
    display_name: String,
    email: String,
    payment_account_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<CoachRow> for Coach {
    fn from(row: CoachRow) -> Self {
        Coach {
            id: row.id,
            profile_id: row.profile_id,
            display_name: row.display_name,
            email: row.email,
            payment_account_id: row.payment_account_id,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ListingRow {
    id: Uuid,
    coach_id: Uuid,
    booking_type: String,
    title: String,
    price_cents: i64,
    currency: String,
    duration_minutes: Option<i32>,
    turnaround_hours: Option<i32>,
    is_active: bool,
}

impl TryFrom<ListingRow> for Listing {
    type Error = CoreError;

    fn try_from(row: ListingRow) -> CoreResult<Self> {
        Ok(Listing {
            id: row.id,
            coach_id: row.coach_id,
            booking_type: row.booking_type.parse()?,
            title: row.title,
            price_cents: row.price_cents,
            currency: row.currency,
            duration_minutes: row.duration_minutes,
            turnaround_hours: row.turnaround_hours,
            is_active: row.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    listing_id: Uuid,
    coach_id: Uuid,
    buyer_profile_id: Option<Uuid>,
    buyer_email: String,
    booking_type: String,
    amount_paid: i64,
    platform_fee: i64,
    currency: String,
    payment_status: String,
    review_status: Option<String>,
    turnaround_hours: Option<i32>,
    accepted_at: Option<DateTime<Utc>>,
    deadline_at: Option<DateTime<Utc>>,
    submitted_review_url: Option<String>,
    checkout_session_id: Option<String>,
    payment_intent_id: Option<String>,
    meeting_id: Option<String>,
    refund_id: Option<String>,
    conversation_id: Option<Uuid>,
    version: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = CoreError;

    fn try_from(row: BookingRow) -> CoreResult<Self> {
        let review = match row.review_status {
            Some(status) => Some(FilmReviewState {
                status: status.parse()?,
                turnaround_hours: row.turnaround_hours.unwrap_or_default(),
                accepted_at: row.accepted_at,
                deadline_at: row.deadline_at,
                submitted_review_url: row.submitted_review_url,
            }),
            None => None,
        };
        Ok(Booking {
            id: row.id,
            listing_id: row.listing_id,
            coach_id: row.coach_id,
            buyer_profile_id: row.buyer_profile_id,
            buyer_email: row.buyer_email,
            booking_type: row.booking_type.parse()?,
            amount_paid: row.amount_paid,
            platform_fee: row.platform_fee,
            currency: row.currency,
            payment_status: row.payment_status.parse()?,
            review,
            checkout_session_id: row.checkout_session_id,
            payment_intent_id: row.payment_intent_id,
            meeting_id: row.meeting_id,
            refund_id: row.refund_id,
            conversation_id: row.conversation_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: Uuid,
    booking_id: Uuid,
    coach_id: Uuid,
    rater_profile_id: Uuid,
    rating: i16,
    comment: Option<String>,
    hidden: bool,
    hidden_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ReviewRow> for Review {
    type Error = CoreError;

    fn try_from(row: ReviewRow) -> CoreResult<Self> {
        Ok(Review {
            id: row.id,
            booking_id: row.booking_id,
            coach_id: row.coach_id,
            rater_profile_id: row.rater_profile_id,
            rating: Rating::try_from(i32::from(row.rating))?,
            comment: row.comment,
            hidden: row.hidden,
            hidden_at: row.hidden_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    effect: Value,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    available_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

fn parse_outbox_status(raw: &str) -> CoreResult<OutboxStatus> {
    match raw {
        "pending" => Ok(OutboxStatus::Pending),
        "processing" => Ok(OutboxStatus::Processing),
        "delivered" => Ok(OutboxStatus::Delivered),
        "failed" => Ok(OutboxStatus::Failed),
        other => Err(CoreError::StoreError(format!("unknown outbox status {}", other))),
    }
}

impl TryFrom<OutboxRow> for OutboxTask {
    type Error = CoreError;

    fn try_from(row: OutboxRow) -> CoreResult<Self> {
        let effect: SideEffect = serde_json::from_value(row.effect)
            .map_err(|e| CoreError::StoreError(format!("unreadable side effect {}: {}", row.id, e)))?;
        Ok(OutboxTask {
            id: row.id,
            effect,
            status: parse_outbox_status(&row.status)?,
            attempts: row.attempts,
            last_error: row.last_error,
            available_at: row.available_at,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl ProfileRepository for PgStore {
    async fn get_profile(&self, id: Uuid) -> CoreResult<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>("SELECT id, email, display_name FROM profiles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(row.map(Profile::from))
    }

    async fn find_profile_by_email(&self, email: &str) -> CoreResult<Option<Profile>> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, email, display_name FROM profiles WHERE lower(email) = lower($1) LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Profile::from))
    }
}

#[async_trait]
impl CoachRepository for PgStore {
    async fn get_coach(&self, id: Uuid) -> CoreResult<Option<Coach>> {
        let row = sqlx::query_as::<_, CoachRow>(
            "SELECT id, profile_id, display_name, email, payment_account_id, created_at FROM coaches WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(row.map(Coach::from))
    }

    async fn set_payment_account_if_unset(&self, coach_id: Uuid, account_id: &str) -> CoreResult<AccountClaim> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            "UPDATE coaches SET payment_account_id = $2 WHERE id = $1 AND payment_account_id IS NULL RETURNING id",
        )
        .bind(coach_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        if claimed.is_some() {
            return Ok(AccountClaim::Claimed);
        }

        let existing: Option<(Option<String>,)> =
            sqlx::query_as("SELECT payment_account_id FROM coaches WHERE id = $1")
                .bind(coach_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match existing {
            Some((Some(current),)) => Ok(AccountClaim::AlreadySet(current)),
            Some((None,)) => Err(CoreError::ConflictError("payment account write lost".to_string())),
            None => Err(CoreError::not_found("coach")),
        }
    }
}

#[async_trait]
impl ListingRepository for PgStore {
    async fn get_listing(&self, id: Uuid) -> CoreResult<Option<Listing>> {
        let row = sqlx::query_as::<_, ListingRow>(
            "SELECT id, coach_id, booking_type, title, price_cents, currency, duration_minutes, \
             turnaround_hours, is_active FROM listings WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Listing::try_from).transpose()
    }
}

#[async_trait]
impl BookingRepository for PgStore {
    async fn insert_booking(&self, booking: &Booking, effects: &[SideEffect]) -> CoreResult<()> {
        let review = booking.review.as_ref();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        sqlx::query(
            "INSERT INTO bookings (id, listing_id, coach_id, buyer_profile_id, buyer_email, booking_type, \
             amount_paid, platform_fee, currency, payment_status, review_status, turnaround_hours, \
             checkout_session_id, version, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $15)",
        )
        .bind(booking.id)
        .bind(booking.listing_id)
        .bind(booking.coach_id)
        .bind(booking.buyer_profile_id)
        .bind(&booking.buyer_email)
        .bind(booking.booking_type.as_str())
        .bind(booking.amount_paid)
        .bind(booking.platform_fee)
        .bind(&booking.currency)
        .bind(booking.payment_status.as_str())
        .bind(review.map(|r| r.status.as_str()))
        .bind(review.map(|r| r.turnaround_hours))
        .bind(&booking.checkout_session_id)
        .bind(booking.version)
        .bind(booking.created_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        insert_effects(&mut tx, effects, booking.created_at).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let sql = format!("SELECT {} FROM bookings WHERE id = $1", BOOKING_COLUMNS);
        let row = sqlx::query_as::<_, BookingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(Booking::try_from).transpose()
    }

    async fn find_booking_by_checkout_session(&self, session_id: &str) -> CoreResult<Option<Booking>> {
        self.fetch_booking_where("checkout_session_id", session_id).await
    }

    async fn find_booking_by_payment_intent(&self, payment_intent_id: &str) -> CoreResult<Option<Booking>> {
        self.fetch_booking_where("payment_intent_id", payment_intent_id).await
    }

    async fn find_booking_by_meeting(&self, meeting_id: &str) -> CoreResult<Option<Booking>> {
        self.fetch_booking_where("meeting_id", meeting_id).await
    }

    async fn update_booking(&self, booking: &Booking, effects: &[SideEffect]) -> CoreResult<bool> {
        let review = booking.review.as_ref();
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let result = sqlx::query(
            "UPDATE bookings SET buyer_profile_id = $3, buyer_email = $4, payment_status = $5, \
             review_status = $6, accepted_at = $7, deadline_at = $8, submitted_review_url = $9, \
             payment_intent_id = $10, meeting_id = $11, refund_id = $12, conversation_id = $13, \
             updated_at = $14, version = version + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(booking.id)
        .bind(booking.version)
        .bind(booking.buyer_profile_id)
        .bind(&booking.buyer_email)
        .bind(booking.payment_status.as_str())
        .bind(review.map(|r| r.status.as_str()))
        .bind(review.and_then(|r| r.accepted_at))
        .bind(review.and_then(|r| r.deadline_at))
        .bind(review.and_then(|r| r.submitted_review_url.clone()))
        .bind(&booking.payment_intent_id)
        .bind(&booking.meeting_id)
        .bind(&booking.refund_id)
        .bind(booking.conversation_id)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            tx.rollback().await.map_err(db_err)?;
            debug!(booking_id = %booking.id, version = booking.version, "Stale booking write rejected");
            return Ok(false);
        }
        insert_effects(&mut tx, effects, booking.updated_at).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn list_overdue_reviews(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE review_status = 'accepted' AND deadline_at <= $1 \
             ORDER BY deadline_at LIMIT $2",
            BOOKING_COLUMNS
        );
        self.fetch_bookings(&sql, now, limit).await
    }

    async fn list_stale_pending(&self, created_before: DateTime<Utc>, limit: i64) -> CoreResult<Vec<Booking>> {
        let sql = format!(
            "SELECT {} FROM bookings WHERE payment_status = 'pending' AND created_at < $1 \
             ORDER BY created_at LIMIT $2",
            BOOKING_COLUMNS
        );
        self.fetch_bookings(&sql, created_before, limit).await
    }
}

#[async_trait]
impl ReviewRepository for PgStore {
    async fn insert_review(&self, review: &Review) -> CoreResult<()> {
        let inserted = sqlx::query(
            "INSERT INTO reviews (id, booking_id, coach_id, rater_profile_id, rating, comment, hidden, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7)",
        )
        .bind(review.id)
        .bind(review.booking_id)
        .bind(review.coach_id)
        .bind(review.rater_profile_id)
        .bind(i16::from(review.rating.value()))
        .bind(&review.comment)
        .bind(review.created_at)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(CoreError::ConflictError(
                "booking has already been reviewed".to_string(),
            )),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn get_review_for_booking(&self, booking_id: Uuid) -> CoreResult<Option<Review>> {
        let row = sqlx::query_as::<_, ReviewRow>(
            "SELECT id, booking_id, coach_id, rater_profile_id, rating, comment, hidden, hidden_at, created_at \
             FROM reviews WHERE booking_id = $1",
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.map(Review::try_from).transpose()
    }
}

#[async_trait]
impl WebhookLedger for PgStore {
    async fn record_event(&self, record: &WebhookEventRecord) -> CoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (id, source, source_id, event_type, occurred_at, payload, received_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (source, source_id, event_type, occurred_at) DO NOTHING",
        )
        .bind(record.id)
        .bind(record.key.source.as_str())
        .bind(&record.key.source_id)
        .bind(&record.key.event_type)
        .bind(record.key.occurred_at)
        .bind(&record.payload)
        .bind(record.received_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ConversationRepository for PgStore {
    async fn create_booking_conversation(
        &self,
        booking_id: Uuid,
        participants: &[Uuid],
        system_message: &str,
    ) -> CoreResult<Uuid> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let created: Option<(Uuid,)> = sqlx::query_as(
            "INSERT INTO conversations (id, booking_id) VALUES ($1, $2) \
             ON CONFLICT (booking_id) DO NOTHING RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(booking_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some((conversation_id,)) = created else {
            tx.rollback().await.map_err(db_err)?;
            let (existing,): (Uuid,) = sqlx::query_as("SELECT id FROM conversations WHERE booking_id = $1")
                .bind(booking_id)
                .fetch_one(&self.pool)
                .await
                .map_err(db_err)?;
            return Ok(existing);
        };

        for profile_id in participants {
            sqlx::query(
                "INSERT INTO conversation_participants (conversation_id, profile_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(conversation_id)
            .bind(profile_id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }
        sqlx::query(
            "INSERT INTO conversation_messages (id, conversation_id, kind, body) VALUES ($1, $2, 'system', $3)",
        )
        .bind(Uuid::new_v4())
        .bind(conversation_id)
        .bind(system_message)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(conversation_id)
    }
}

#[async_trait]
impl OutboxRepository for PgStore {
    async fn enqueue(&self, effects: &[SideEffect]) -> CoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        insert_effects(&mut tx, effects, Utc::now()).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Claimed tasks are leased; a worker that dies mid-task releases them when the lease ends.
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> CoreResult<Vec<OutboxTask>> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            "UPDATE outbox_tasks SET status = 'processing', attempts = attempts + 1, available_at = $3 \
             WHERE id IN ( \
                 SELECT id FROM outbox_tasks \
                 WHERE status IN ('pending', 'processing') AND available_at <= $1 \
                 ORDER BY available_at LIMIT $2 FOR UPDATE SKIP LOCKED) \
             RETURNING id, effect, status, attempts, last_error, available_at, created_at",
        )
        .bind(now)
        .bind(limit)
        .bind(now + Duration::seconds(CLAIM_LEASE_SECS))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.into_iter().map(OutboxTask::try_from).collect()
    }

    async fn mark_delivered(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE outbox_tasks SET status = 'delivered', last_error = NULL WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, error: &str, retry_at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query(
            "UPDATE outbox_tasks SET status = 'pending', last_error = $2, available_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> CoreResult<()> {
        sqlx::query("UPDATE outbox_tasks SET status = 'failed', last_error = $2 WHERE id = $1")
            .bind(id)
            .bind(error)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
