use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, RuleViolation};

impl Engine {
    /// Register a user account. Emails are unique case-insensitively.
    pub async fn register_user(
        &self,
        email: &str,
        password_hash: &str,
        name: Option<String>,
        role: Role,
    ) -> Result<User, EngineError> {
        if email.is_empty() || email.len() > MAX_EMAIL_LEN || !email.contains('@') {
            return Err(EngineError::LimitExceeded("invalid email"));
        }
        if let Some(ref n) = name {
            if n.len() > MAX_NAME_LEN {
                return Err(EngineError::LimitExceeded("name too long"));
            }
        }
        let email = email.to_lowercase();
        if self.store.user_id_by_email(&email).is_some() {
            return Err(RuleViolation::EmailTaken.into());
        }

        let user = User {
            id: Ulid::new(),
            email,
            password_hash: password_hash.to_string(),
            name,
            role,
            active: true,
        };
        self.persist_global(&Event::UserRegistered(user.clone()))
            .await?;
        Ok(user)
    }

    /// Create or update the counselor profile attached to a user. The target
    /// must hold the counselor role; a user has at most one profile, so an
    /// update keeps the existing profile id.
    pub async fn upsert_counselor_profile(
        &self,
        counselor_user_id: Ulid,
        specialization: &str,
        qualifications: Option<String>,
        bio: Option<String>,
    ) -> Result<CounselorProfile, EngineError> {
        let user = self
            .store
            .user(&counselor_user_id)
            .ok_or(EngineError::NotFound("user", counselor_user_id))?;
        if user.role != Role::Counselor {
            return Err(RuleViolation::InvalidCounselorRole.into());
        }
        if specialization.is_empty() || specialization.len() > MAX_SPECIALIZATION_LEN {
            return Err(EngineError::LimitExceeded("specialization length"));
        }
        if qualifications.as_deref().is_some_and(|q| q.len() > MAX_FREE_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("qualifications too long"));
        }
        if bio.as_deref().is_some_and(|b| b.len() > MAX_FREE_TEXT_LEN) {
            return Err(EngineError::LimitExceeded("bio too long"));
        }

        let id = self
            .store
            .profile_for_user(&counselor_user_id)
            .map_or_else(Ulid::new, |existing| existing.id);
        let profile = CounselorProfile {
            id,
            user_id: counselor_user_id,
            specialization: specialization.to_string(),
            qualifications,
            bio,
        };
        self.persist_global(&Event::ProfileUpserted(profile.clone()))
            .await?;
        Ok(profile)
    }
}
