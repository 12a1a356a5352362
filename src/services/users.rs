use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashSet;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use super::notifications::NotificationRequest;
use super::referrals::{trigger_qualification, ReferralRequest};
use super::{format_time, CoreConfig, Precondition, RequestHandler, Service, ServiceError};
use crate::models::{
    channels::{ChannelRef, Membership},
    referrals::Qualification,
    stats::Stats,
    users::{normalize_phone, BonusClaim, Language, PhoneBinding, Profile, User},
};
use crate::repositories::{Messenger, UserStore};

pub enum UserRequest {
    Register {
        tg_id: i64,
        referrer_id: Option<i64>,
        response: oneshot::Sender<Result<Registration, ServiceError>>,
    },
    GetProfile {
        id: i64,
        response: oneshot::Sender<Result<Profile, ServiceError>>,
    },
    ClaimBonus {
        id: i64,
        response: oneshot::Sender<Result<BonusReceipt, ServiceError>>,
    },
    SetLanguage {
        id: i64,
        language: String,
        response: oneshot::Sender<Result<Language, ServiceError>>,
    },
    SetPhone {
        id: i64,
        phone: String,
        response: oneshot::Sender<Result<String, ServiceError>>,
    },
    CheckAccess {
        id: i64,
        response: oneshot::Sender<Result<(), ServiceError>>,
    },
    GetStats {
        response: oneshot::Sender<Result<Stats, ServiceError>>,
    },
}

#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    pub created: bool,
    pub user: User,
}

#[derive(Clone, Debug, Serialize)]
pub struct BonusReceipt {
    pub balance_in_cents: i64,
    pub qualification: Option<Qualification>,
}

#[derive(Clone)]
pub struct UserRequestHandler {
    repository: Arc<dyn UserStore>,
    messenger: Arc<dyn Messenger>,
    config: CoreConfig,
    referral_channel: mpsc::Sender<ReferralRequest>,
    notification_channel: mpsc::Sender<NotificationRequest>,
    reported_channels: Arc<DashSet<String>>,
}

impl UserRequestHandler {
    pub fn new(
        repository: Arc<dyn UserStore>,
        messenger: Arc<dyn Messenger>,
        config: CoreConfig,
        referral_channel: mpsc::Sender<ReferralRequest>,
        notification_channel: mpsc::Sender<NotificationRequest>,
    ) -> Self {
        Self {
            repository,
            messenger,
            config,
            referral_channel,
            notification_channel,
            reported_channels: Arc::new(DashSet::new()),
        }
    }

    async fn get_user(&self, id: i64) -> Result<User, ServiceError> {
        self.repository
            .get_user(id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::user_not_found(id))
    }

    async fn register(
        &self,
        tg_id: i64,
        referrer_id: Option<i64>,
    ) -> Result<Registration, ServiceError> {
        let created = self
            .repository
            .insert_user(tg_id, referrer_id)
            .await
            .map_err(ServiceError::database)?;
        let user = self.get_user(tg_id).await?;

        if user.banned {
            return Err(ServiceError::precondition(Precondition::Banned, "user is banned"));
        }
        if created {
            log::info!("Registered user {} (referrer: {:?}).", tg_id, user.referrer_id);
        }

        Ok(Registration { created, user })
    }

    async fn get_profile(&self, id: i64) -> Result<Profile, ServiceError> {
        let user = self.get_user(id).await?;
        let summary = self
            .repository
            .referral_summary(id)
            .await
            .map_err(ServiceError::database)?
            .ok_or_else(|| ServiceError::user_not_found(id))?;

        Ok(Profile {
            tg_id: user.tg_id,
            balance_in_cents: user.balance_in_cents,
            activated: user.activated,
            language: user.language,
            phone: user.phone,
            active_referrals: summary.active,
            manual_referrals: summary.manual,
            available_cycles: summary.available_cycles(),
            used_cycles: summary.used_cycles,
            referrals_to_next_cycle: summary.remaining_to_next_cycle(),
        })
    }

    async fn claim_bonus(&self, id: i64) -> Result<BonusReceipt, ServiceError> {
        let claim = self
            .repository
            .claim_bonus(
                id,
                self.config.rewards.daily_bonus_in_cents,
                Duration::hours(self.config.rewards.bonus_interval_hours),
                Utc::now(),
            )
            .await
            .map_err(ServiceError::database)?;

        match claim {
            BonusClaim::Claimed { balance_in_cents } => {
                let qualification = trigger_qualification(&self.referral_channel, id).await;
                Ok(BonusReceipt {
                    balance_in_cents,
                    qualification,
                })
            }
            BonusClaim::NotReady { next_claim_at } => Err(ServiceError::precondition(
                Precondition::BonusNotReady,
                format!("next bonus available at {}", format_time(&next_claim_at)),
            )),
            BonusClaim::NotFound => Err(ServiceError::user_not_found(id)),
        }
    }

    async fn set_language(&self, id: i64, code: &str) -> Result<Language, ServiceError> {
        let language = Language::from_code(code);
        let updated = self
            .repository
            .set_language(id, language)
            .await
            .map_err(ServiceError::database)?;

        if updated {
            Ok(language)
        } else {
            Err(ServiceError::user_not_found(id))
        }
    }

    async fn set_phone(&self, id: i64, raw: &str) -> Result<String, ServiceError> {
        let Some(phone) = normalize_phone(raw) else {
            return Err(ServiceError::precondition(
                Precondition::InvalidPhone,
                "supported prefixes: +380, +7, +375",
            ));
        };

        match self
            .repository
            .set_phone(id, &phone)
            .await
            .map_err(ServiceError::database)?
        {
            PhoneBinding::Saved => Ok(phone),
            PhoneBinding::InUse => Err(ServiceError::precondition(
                Precondition::PhoneInUse,
                "phone is bound to another account",
            )),
            PhoneBinding::NotFound => Err(ServiceError::user_not_found(id)),
        }
    }

    async fn check_access(&self, id: i64) -> Result<(), ServiceError> {
        let user = self.get_user(id).await?;
        if user.banned {
            return Err(ServiceError::precondition(Precondition::Banned, "user is banned"));
        }

        for channel in &self.config.channels {
            if !self.is_subscribed(channel, id).await {
                return Err(ServiceError::precondition(
                    Precondition::NotSubscribed,
                    format!("not subscribed to {}", channel),
                ));
            }
        }

        Ok(())
    }

    async fn is_subscribed(&self, channel: &ChannelRef, id: i64) -> bool {
        if let ChannelRef::InviteLink(link) = channel {
            log::warn!("Cannot check membership through an invite link: {}", link);
            return false;
        }

        match self.messenger.membership(channel, id).await {
            Ok(Membership::Member) => true,
            Ok(Membership::NotMember) => false,
            Ok(Membership::Uninspectable) => {
                self.report_uninspectable(channel).await;
                true
            }
            Err(e) => {
                log::debug!("Membership check of {} in {} failed: {}", id, channel, e);
                false
            }
        }
    }

    /// Skipped channels are reported to admins once per process lifetime.
    async fn report_uninspectable(&self, channel: &ChannelRef) {
        if !self.reported_channels.insert(channel.to_string()) {
            return;
        }

        log::warn!("Channel {} cannot be inspected; skipping it.", channel);
        let _ = self
            .notification_channel
            .send(NotificationRequest::NotifyAdmins {
                text: format!(
                    "⚠️ Channel {} is not checked: the bot has no access to its members. \
                     It is skipped in subscription checks for now.",
                    channel
                ),
            })
            .await;
    }

    async fn get_stats(&self) -> Result<Stats, ServiceError> {
        let now = Utc::now();
        let stats = self
            .repository
            .stats(now)
            .await
            .map_err(ServiceError::database)?;

        Ok(stats.with_uptime(self.config.start_date, now))
    }
}

#[async_trait]
impl RequestHandler<UserRequest> for UserRequestHandler {
    async fn handle_request(&self, request: UserRequest) {
        match request {
            UserRequest::Register {
                tg_id,
                referrer_id,
                response,
            } => {
                let result = self.register(tg_id, referrer_id).await;
                let _ = response.send(result);
            }
            UserRequest::GetProfile { id, response } => {
                let result = self.get_profile(id).await;
                let _ = response.send(result);
            }
            UserRequest::ClaimBonus { id, response } => {
                let result = self.claim_bonus(id).await;
                let _ = response.send(result);
            }
            UserRequest::SetLanguage {
                id,
                language,
                response,
            } => {
                let result = self.set_language(id, &language).await;
                let _ = response.send(result);
            }
            UserRequest::SetPhone {
                id,
                phone,
                response,
            } => {
                let result = self.set_phone(id, &phone).await;
                let _ = response.send(result);
            }
            UserRequest::CheckAccess { id, response } => {
                let result = self.check_access(id).await;
                let _ = response.send(result);
            }
            UserRequest::GetStats { response } => {
                let result = self.get_stats().await;
                let _ = response.send(result);
            }
        }
    }
}

pub struct UserService;

impl UserService {
    pub fn new() -> Self {
        UserService {}
    }
}

#[async_trait]
impl Service<UserRequest, UserRequestHandler> for UserService {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::referrals::Gate;
    use crate::services::testing::{config, RecordingMessenger, ADMIN_ID, DAILY_BONUS};

    struct Fixture {
        handler: UserRequestHandler,
        store: crate::repositories::memory::MemoryStore,
        messenger: Arc<RecordingMessenger>,
        notifications: mpsc::Receiver<NotificationRequest>,
        _referrals: mpsc::Receiver<ReferralRequest>,
    }

    fn fixture(channels: Vec<ChannelRef>) -> Fixture {
        let store = crate::repositories::memory::MemoryStore::new();
        let messenger = Arc::new(RecordingMessenger::default());
        let (referral_tx, referral_rx) = mpsc::channel(16);
        let (notification_tx, notification_rx) = mpsc::channel(16);
        let handler = UserRequestHandler::new(
            Arc::new(store.clone()),
            messenger.clone(),
            config(channels),
            referral_tx,
            notification_tx,
        );

        Fixture {
            handler,
            store,
            messenger,
            notifications: notification_rx,
            _referrals: referral_rx,
        }
    }

    #[tokio::test]
    async fn registration_is_idempotent_and_drops_self_referral() {
        let f = fixture(Vec::new());

        let first = f.handler.register(5, Some(5)).await.unwrap();
        assert!(first.created);
        assert_eq!(first.user.referrer_id, None);

        let again = f.handler.register(5, None).await.unwrap();
        assert!(!again.created);
    }

    #[tokio::test]
    async fn referrer_is_kept_only_if_registered_and_never_changes() {
        let f = fixture(Vec::new());
        f.handler.register(1, None).await.unwrap();

        let unknown = f.handler.register(2, Some(77)).await.unwrap();
        assert_eq!(unknown.user.referrer_id, None);

        let referred = f.handler.register(3, Some(1)).await.unwrap();
        assert_eq!(referred.user.referrer_id, Some(1));

        let replay = f.handler.register(3, Some(2)).await.unwrap();
        assert_eq!(replay.user.referrer_id, Some(1));
    }

    #[tokio::test]
    async fn banned_users_cannot_register_or_pass_access() {
        let f = fixture(Vec::new());
        f.handler.register(9, None).await.unwrap();
        f.store.set_banned(9, true).await.unwrap();

        assert!(matches!(
            f.handler.register(9, None).await,
            Err(ServiceError::PreconditionFailed(Precondition::Banned, _))
        ));
        assert!(matches!(
            f.handler.check_access(9).await,
            Err(ServiceError::PreconditionFailed(Precondition::Banned, _))
        ));
    }

    #[tokio::test]
    async fn bonus_is_recurring_not_repeatable() {
        let f = fixture(Vec::new());
        f.handler.register(4, None).await.unwrap();

        // Nobody answers the referral channel; qualification is reported as absent.
        drop(f._referrals);
        let receipt = f.handler.claim_bonus(4).await.unwrap();
        assert_eq!(receipt.balance_in_cents, DAILY_BONUS);
        assert!(receipt.qualification.is_none());

        assert!(matches!(
            f.handler.claim_bonus(4).await,
            Err(ServiceError::PreconditionFailed(Precondition::BonusNotReady, _))
        ));
        assert!(f.store.get_user(4).await.unwrap().unwrap().last_bonus_at.is_some());
    }

    #[tokio::test]
    async fn phone_must_be_valid_and_unique() {
        let f = fixture(Vec::new());
        f.handler.register(1, None).await.unwrap();
        f.handler.register(2, None).await.unwrap();

        assert_eq!(
            f.handler.set_phone(1, "+380 67 123 45 67").await.unwrap(),
            "+380671234567"
        );
        assert!(matches!(
            f.handler.set_phone(2, "380671234567").await,
            Err(ServiceError::PreconditionFailed(Precondition::PhoneInUse, _))
        ));
        assert!(matches!(
            f.handler.set_phone(2, "+1 415 555 2671").await,
            Err(ServiceError::PreconditionFailed(Precondition::InvalidPhone, _))
        ));
        assert!(f.handler.set_phone(1, "+380671234567").await.is_ok());
    }

    #[tokio::test]
    async fn language_falls_back_to_ru() {
        let f = fixture(Vec::new());
        f.handler.register(1, None).await.unwrap();

        assert_eq!(f.handler.set_language(1, "ua").await.unwrap(), Language::Ua);
        assert_eq!(f.handler.set_language(1, "de").await.unwrap(), Language::Ru);
        assert!(matches!(
            f.handler.set_language(2, "ua").await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn access_requires_every_inspectable_channel() {
        let news = ChannelRef::parse("@news").unwrap();
        let hidden = ChannelRef::parse("-1001").unwrap();
        let mut f = fixture(vec![news.clone(), hidden.clone()]);
        f.handler.register(1, None).await.unwrap();
        f.handler.register(2, None).await.unwrap();
        f.messenger
            .set_membership(&hidden, 1, Membership::Uninspectable);
        f.messenger
            .set_membership(&hidden, 2, Membership::Uninspectable);
        f.messenger.set_membership(&news, 2, Membership::NotMember);

        assert!(f.handler.check_access(1).await.is_ok());
        assert!(f.handler.check_access(1).await.is_ok());
        assert!(matches!(
            f.handler.check_access(2).await,
            Err(ServiceError::PreconditionFailed(Precondition::NotSubscribed, _))
        ));

        // Admins hear about the hidden channel exactly once.
        assert!(matches!(
            f.notifications.try_recv(),
            Ok(NotificationRequest::NotifyAdmins { .. })
        ));
        assert!(f.notifications.try_recv().is_err());
        assert!(f.messenger.messages_to(ADMIN_ID).is_empty());
    }

    #[tokio::test]
    async fn invite_links_never_pass() {
        let link = ChannelRef::parse("https://t.me/+secret").unwrap();
        let f = fixture(vec![link]);
        f.handler.register(1, None).await.unwrap();

        assert!(f.handler.check_access(1).await.is_err());
    }

    #[tokio::test]
    async fn profile_reports_cycle_progress() {
        let f = fixture(Vec::new());
        f.handler.register(1, None).await.unwrap();
        f.store.set_manual_refs(1, 13).await.unwrap();

        let profile = f.handler.get_profile(1).await.unwrap();
        assert_eq!(profile.manual_referrals, 13);
        assert_eq!(profile.available_cycles, 1);
        assert_eq!(profile.referrals_to_next_cycle, 0);
        assert!(!profile.activated);
        assert!(matches!(
            f.handler.get_profile(2).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bonus_triggers_qualification_through_the_referral_service() {
        let harness = crate::services::testing::Harness::start();
        let (response, receiver) = oneshot::channel();
        harness
            .channels
            .users
            .send(UserRequest::Register {
                tg_id: 1,
                referrer_id: None,
                response,
            })
            .await
            .unwrap();
        receiver.await.unwrap().unwrap();

        let (response, receiver) = oneshot::channel();
        harness
            .channels
            .users
            .send(UserRequest::ClaimBonus { id: 1, response })
            .await
            .unwrap();
        let receipt = receiver.await.unwrap().unwrap();

        assert_eq!(
            receipt.qualification,
            Some(Qualification::Blocked {
                gate: Gate::NoReferrer
            })
        );
    }
}
