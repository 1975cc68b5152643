use crate::database::two_factor::ChallengeRepository;
use crate::error::app_error::AppError;
use crate::models::two_factor::{TwoFactorChallenge, TwoFactorMethod};
use crate::models::user::User;
use crate::service::email::EmailService;
use crate::service::sms::SmsService;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

/// Delivers a one-time code to the user over the chosen channel.
#[async_trait::async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, user: &User, method: TwoFactorMethod, code: &str, ttl_minutes: i64) -> Result<(), AppError>;
}

pub struct MessageTransports {
    pub email: EmailService,
    pub sms: SmsService,
}

#[async_trait::async_trait]
impl CodeDelivery for MessageTransports {
    async fn deliver(&self, user: &User, method: TwoFactorMethod, code: &str, ttl_minutes: i64) -> Result<(), AppError> {
        match method {
            TwoFactorMethod::Email => self.email.send_code_email(&user.email, &user.name, code, ttl_minutes).await,
            TwoFactorMethod::Sms => {
                let phone = user
                    .phone_number
                    .as_deref()
                    .ok_or_else(|| AppError::Invalid("No phone number on file".to_string()))?;
                self.sms.send_code_sms(phone, code, ttl_minutes).await
            }
            TwoFactorMethod::Totp => Err(AppError::Invalid("TOTP codes are not delivered".to_string())),
        }
    }
}

fn generate_code() -> String {
    rand::rng().random_range(100_000..=999_999u32).to_string()
}

fn codes_match(expected: &str, given: &str) -> bool {
    expected.len() == given.len() && expected.bytes().zip(given.bytes()).fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Issues and checks email/SMS one-time codes.
#[derive(Clone)]
pub struct ChallengeService {
    repo: Arc<dyn ChallengeRepository>,
    delivery: Arc<dyn CodeDelivery>,
    ttl: Duration,
    max_attempts: i32,
}

impl ChallengeService {
    pub fn new(repo: Arc<dyn ChallengeRepository>, delivery: Arc<dyn CodeDelivery>, ttl: Duration, max_attempts: i32) -> Self {
        Self {
            repo,
            delivery,
            ttl,
            max_attempts,
        }
    }

    pub async fn issue(&self, tenant_id: Uuid, user_id: Uuid, method: TwoFactorMethod) -> Result<TwoFactorChallenge, AppError> {
        if !method.uses_challenge() {
            return Err(AppError::Invalid(format!("{} does not use delivered codes", method)));
        }

        let now = Utc::now();
        let challenge = TwoFactorChallenge {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            code: generate_code(),
            method,
            created_at: now,
            expires_at: now + self.ttl,
            is_used: false,
            attempts: 0,
            used_at: None,
        };
        self.repo.insert_challenge(&challenge).await?;
        Ok(challenge)
    }

    /// Issue a challenge and hand it to the transport. Delivery failures are logged only.
    pub async fn issue_and_send(&self, user: &User, method: TwoFactorMethod) -> Result<TwoFactorChallenge, AppError> {
        let challenge = self.issue(user.tenant_id, user.id, method).await?;

        if let Err(e) = self.delivery.deliver(user, method, &challenge.code, self.ttl.num_minutes()).await {
            tracing::error!(user_id = %user.id, method = %method, "failed to deliver verification code: {}", e);
        }

        Ok(challenge)
    }

    /// Counts the attempt first, then checks state, then the code. A success can happen once.
    pub async fn verify(&self, challenge_id: &Uuid, input_code: &str) -> Result<bool, AppError> {
        let Some(challenge) = self.repo.register_attempt(challenge_id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        if !challenge.is_valid_at(now, self.max_attempts) {
            tracing::debug!(challenge_id = %challenge_id, attempts = challenge.attempts, "challenge no longer valid");
            return Ok(false);
        }

        if !codes_match(&challenge.code, input_code) {
            return Ok(false);
        }

        self.repo.mark_used(challenge_id, now, self.max_attempts).await
    }

    /// Verifies against the newest unused, unexpired challenge for the method.
    pub async fn verify_latest(&self, user_id: &Uuid, method: TwoFactorMethod, input_code: &str) -> Result<bool, AppError> {
        match self.repo.latest_challenge(user_id, method, Utc::now()).await? {
            Some(challenge) => self.verify(&challenge.id, input_code).await,
            None => Ok(false),
        }
    }

    pub async fn purge_stale(&self, before: DateTime<Utc>) -> Result<u64, AppError> {
        self.repo.delete_stale_challenges(before).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MemoryChallengeRepository, RecordingDelivery, sample_user};

    fn service() -> (ChallengeService, Arc<MemoryChallengeRepository>, Arc<RecordingDelivery>) {
        let repo = Arc::new(MemoryChallengeRepository::default());
        let delivery = Arc::new(RecordingDelivery::default());
        (ChallengeService::new(repo.clone(), delivery.clone(), Duration::minutes(5), 5), repo, delivery)
    }

    #[test]
    fn codes_are_six_digits() {
        for _ in 0..1000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let n: u32 = code.parse().unwrap();
            assert!((100_000..=999_999).contains(&n));
        }
    }

    #[test]
    fn code_comparison() {
        assert!(codes_match("123456", "123456"));
        assert!(!codes_match("123456", "123457"));
        assert!(!codes_match("123456", "12345"));
    }

    #[tokio::test]
    async fn issue_persists_with_ttl() {
        let (service, repo, _) = service();
        let challenge = service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Email).await.unwrap();
        assert_eq!(challenge.expires_at - challenge.created_at, Duration::minutes(5));
        assert_eq!(challenge.attempts, 0);
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn totp_cannot_be_issued() {
        let (service, _, _) = service();
        assert!(service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Totp).await.is_err());
    }

    #[tokio::test]
    async fn correct_code_verifies_once() {
        let (service, repo, _) = service();
        let challenge = service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Sms).await.unwrap();

        assert!(service.verify(&challenge.id, &challenge.code).await.unwrap());
        assert!(!service.verify(&challenge.id, &challenge.code).await.unwrap());

        let stored = repo.all().pop().unwrap();
        assert!(stored.is_used);
        assert!(stored.used_at.is_some());
    }

    #[tokio::test]
    async fn wrong_code_consumes_attempt() {
        let (service, repo, _) = service();
        let challenge = service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Email).await.unwrap();

        assert!(!service.verify(&challenge.id, "000000").await.unwrap());
        assert_eq!(repo.all().pop().unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn challenge_at_cap_rejects_correct_code() {
        let (service, repo, _) = service();
        let challenge = service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Email).await.unwrap();
        repo.set_attempts(&challenge.id, 5);

        assert!(!service.verify(&challenge.id, &challenge.code).await.unwrap());
    }

    #[tokio::test]
    async fn fifth_attempt_may_still_succeed() {
        let (service, _, _) = service();
        let challenge = service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Email).await.unwrap();
        for _ in 0..4 {
            assert!(!service.verify(&challenge.id, "000000").await.unwrap());
        }
        assert!(service.verify(&challenge.id, &challenge.code).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_challenge_is_false() {
        let (service, _, _) = service();
        assert!(!service.verify(&Uuid::new_v4(), "123456").await.unwrap());
    }

    #[tokio::test]
    async fn verify_latest_targets_newest_challenge() {
        let (service, _, _) = service();
        let user_id = Uuid::new_v4();
        let tenant_id = Uuid::new_v4();
        let older = service.issue(tenant_id, user_id, TwoFactorMethod::Email).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let newer = service.issue(tenant_id, user_id, TwoFactorMethod::Email).await.unwrap();

        if older.code != newer.code {
            assert!(!service.verify_latest(&user_id, TwoFactorMethod::Email, &older.code).await.unwrap());
        }
        assert!(service.verify_latest(&user_id, TwoFactorMethod::Email, &newer.code).await.unwrap());
        assert!(!service.verify_latest(&user_id, TwoFactorMethod::Sms, &newer.code).await.unwrap());
    }

    #[tokio::test]
    async fn issue_and_send_delivers_code() {
        let (service, _, delivery) = service();
        let user = sample_user();
        let challenge = service.issue_and_send(&user, TwoFactorMethod::Email).await.unwrap();
        assert_eq!(delivery.sent(), vec![(user.id, TwoFactorMethod::Email, challenge.code)]);
    }

    #[tokio::test]
    async fn delivery_failure_still_returns_challenge() {
        let repo = Arc::new(MemoryChallengeRepository::default());
        let delivery = Arc::new(RecordingDelivery::failing());
        let service = ChallengeService::new(repo.clone(), delivery, Duration::minutes(5), 5);

        assert!(service.issue_and_send(&sample_user(), TwoFactorMethod::Sms).await.is_ok());
        assert_eq!(repo.all().len(), 1);
    }

    #[tokio::test]
    async fn purge_removes_expired() {
        let (service, repo, _) = service();
        service.issue(Uuid::new_v4(), Uuid::new_v4(), TwoFactorMethod::Email).await.unwrap();
        let removed = service.purge_stale(Utc::now() + Duration::minutes(10)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.all().is_empty());
    }
}
