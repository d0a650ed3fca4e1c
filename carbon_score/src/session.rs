//! Signed-in user and credit balance.
//!
//! A [`Session`] is created at the application boundary and handed to whatever
//! needs it. The estimation engine never sees it.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::store::KeyValueStore;
use crate::{sha256_hex, CarbonError};

pub const ADMIN_STARTING_CREDITS: u32 = 1000;
pub const USER_STARTING_CREDITS: u32 = 100;

const USER_KEY: &str = "user";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn starting_credits(&self) -> u32 {
        match self {
            Role::Admin => ADMIN_STARTING_CREDITS,
            Role::User => USER_STARTING_CREDITS,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Website,
    Repository,
}

impl AnalysisKind {
    pub fn cost(&self) -> u32 {
        match self {
            AnalysisKind::Website => 5,
            AnalysisKind::Repository => 10,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CreditPackage {
    pub credits: u32,
    pub price_cents: u32,
}

impl CreditPackage {
    /// Looks up the package that grants exactly `credits`.
    pub fn find(credits: u32) -> Result<&'static CreditPackage, CarbonError> {
        CREDIT_PACKAGES
            .iter()
            .find(|p| p.credits == credits)
            .ok_or_else(|| {
                let sizes: Vec<String> =
                    CREDIT_PACKAGES.iter().map(|p| p.credits.to_string()).collect();
                CarbonError::InvalidOption(format!(
                    "no {credits}-credit package; choose one of {}",
                    sizes.join(", ")
                ))
            })
    }

    pub fn price_per_credit(&self) -> f64 {
        self.price_cents as f64 / 100.0 / self.credits as f64
    }
}

pub const CREDIT_PACKAGES: [CreditPackage; 4] = [
    CreditPackage { credits: 50, price_cents: 499 },
    CreditPackage { credits: 100, price_cents: 999 },
    CreditPackage { credits: 500, price_cents: 3999 },
    CreditPackage { credits: 1000, price_cents: 6999 },
];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub credits: u32,
}

/// Stored shape of a [`User`]. `credits` is absent on records written before
/// balances existed.
#[derive(Deserialize)]
struct StoredUser {
    id: String,
    name: String,
    email: String,
    role: Role,
    credits: Option<u32>,
}

impl StoredUser {
    fn into_user(self) -> (User, bool) {
        let legacy = self.credits.is_none();
        let user = User {
            credits: self.credits.unwrap_or_else(|| self.role.starting_credits()),
            id: self.id,
            name: self.name,
            email: self.email,
            role: self.role,
        };
        (user, legacy)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<User>,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn credits(&self) -> Option<u32> {
        self.user.as_ref().map(|u| u.credits)
    }

    pub fn sign_in(&mut self, email: &str, role: Role) -> Result<&User, CarbonError> {
        let email = email.trim();
        let Some((local, domain)) = email.split_once('@') else {
            return Err(CarbonError::InvalidOption(format!(
                "'{email}' is not an email address"
            )));
        };
        if local.is_empty() || domain.is_empty() {
            return Err(CarbonError::InvalidOption(format!(
                "'{email}' is not an email address"
            )));
        }
        let id = sha256_hex(email.to_ascii_lowercase().as_bytes())[..16].to_string();
        info!(%email, ?role, "signed in");
        Ok(self.user.insert(User {
            id,
            name: local.to_string(),
            email: email.to_string(),
            role,
            credits: role.starting_credits(),
        }))
    }

    /// Deducts the cost of `kind`. The balance is untouched on failure.
    pub fn charge(&mut self, kind: AnalysisKind) -> Result<u32, CarbonError> {
        let user = self.user.as_mut().ok_or(CarbonError::NotSignedIn)?;
        let required = kind.cost();
        if user.credits < required {
            return Err(CarbonError::InsufficientCredits {
                required,
                available: user.credits,
            });
        }
        user.credits -= required;
        Ok(user.credits)
    }

    pub fn add_credits(&mut self, amount: u32) -> Result<u32, CarbonError> {
        let user = self.user.as_mut().ok_or(CarbonError::NotSignedIn)?;
        user.credits = user.credits.saturating_add(amount);
        Ok(user.credits)
    }

    pub fn purchase(&mut self, package: &CreditPackage) -> Result<u32, CarbonError> {
        let balance = self.add_credits(package.credits)?;
        info!(
            credits = package.credits,
            price_cents = package.price_cents,
            balance,
            "purchased credit package"
        );
        Ok(balance)
    }

    /// Loads the stored user. Records without a `credits` field predate
    /// balances and are given the role's starting balance; a stored zero stays
    /// zero.
    pub fn restore(store: &mut dyn KeyValueStore) -> Result<Self, CarbonError> {
        let Some(text) = store.get(USER_KEY)? else {
            return Ok(Self::signed_out());
        };
        let stored: StoredUser = match serde_json::from_str(&text) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("failed to parse stored user: {e}");
                return Ok(Self::signed_out());
            }
        };
        let (user, legacy) = stored.into_user();
        let session = Self { user: Some(user) };
        if legacy {
            info!(credits = ?session.credits(), "granted starting credits to legacy user record");
            session.save(store)?;
        }
        Ok(session)
    }

    pub fn save(&self, store: &mut dyn KeyValueStore) -> Result<(), CarbonError> {
        match &self.user {
            Some(user) => {
                let text = serde_json::to_string(user)
                    .map_err(|e| CarbonError::Store(format!("failed to encode user: {e}")))?;
                store.set(USER_KEY, &text)
            }
            None => store.remove(USER_KEY),
        }
    }

    pub fn sign_out(&mut self, store: &mut dyn KeyValueStore) -> Result<(), CarbonError> {
        self.user = None;
        store.remove(USER_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn sign_in_grants_role_credits() {
        let mut session = Session::signed_out();
        let user = session.sign_in("ada@example.com", Role::User).unwrap();
        assert_eq!(user.name, "ada");
        assert_eq!(user.credits, 100);
        assert_eq!(user.id.len(), 16);
        let admin = session.sign_in("root@example.com", Role::Admin).unwrap();
        assert_eq!(admin.credits, 1000);
        assert!(session.sign_in("not-an-email", Role::User).is_err());
        assert!(session.sign_in("@example.com", Role::User).is_err());
    }

    #[test]
    fn ids_are_stable_per_email() {
        let mut a = Session::signed_out();
        let mut b = Session::signed_out();
        let id_a = a.sign_in("Ada@Example.com", Role::User).unwrap().id.clone();
        let id_b = b.sign_in("ada@example.com", Role::User).unwrap().id.clone();
        assert_eq!(id_a, id_b);
    }

    #[test]
    fn charging_respects_balance() {
        let mut session = Session::signed_out();
        assert_eq!(
            session.charge(AnalysisKind::Website),
            Err(CarbonError::NotSignedIn)
        );
        session.sign_in("ada@example.com", Role::User).unwrap();
        assert_eq!(session.charge(AnalysisKind::Repository), Ok(90));
        assert_eq!(session.charge(AnalysisKind::Website), Ok(85));
        for _ in 0..17 {
            session.charge(AnalysisKind::Website).unwrap();
        }
        assert_eq!(session.credits(), Some(0));
        assert_eq!(
            session.charge(AnalysisKind::Website),
            Err(CarbonError::InsufficientCredits {
                required: 5,
                available: 0
            })
        );
        assert_eq!(session.purchase(&CREDIT_PACKAGES[0]), Ok(50));
    }

    #[test]
    fn persists_through_store() {
        let mut store = MemoryStore::new();
        let mut session = Session::signed_out();
        session.sign_in("ada@example.com", Role::User).unwrap();
        session.charge(AnalysisKind::Website).unwrap();
        session.save(&mut store).unwrap();

        let restored = Session::restore(&mut store).unwrap();
        assert_eq!(restored, session);

        session.sign_out(&mut store).unwrap();
        assert_eq!(Session::restore(&mut store).unwrap(), Session::signed_out());
    }

    #[test]
    fn legacy_records_are_topped_up() {
        let mut store = MemoryStore::new();
        store
            .set(
                "user",
                r#"{"id":"1","name":"Admin User","email":"admin@example.com","role":"admin"}"#,
            )
            .unwrap();
        let session = Session::restore(&mut store).unwrap();
        assert_eq!(session.credits(), Some(1000));
        let saved = store.get("user").unwrap().unwrap();
        assert!(saved.contains("\"credits\":1000"));
    }

    #[test]
    fn spent_balance_survives_restore() {
        let mut store = MemoryStore::new();
        let mut session = Session::signed_out();
        session.sign_in("ada@example.com", Role::User).unwrap();
        for _ in 0..20 {
            session.charge(AnalysisKind::Website).unwrap();
        }
        assert_eq!(session.credits(), Some(0));
        session.save(&mut store).unwrap();

        let restored = Session::restore(&mut store).unwrap();
        assert_eq!(restored.credits(), Some(0));
        assert!(store.get("user").unwrap().unwrap().contains("\"credits\":0"));
    }

    #[test]
    fn packages_price_per_credit() {
        assert!((CREDIT_PACKAGES[1].price_per_credit() - 0.0999).abs() < 1e-9);
        assert!(CREDIT_PACKAGES[3].price_per_credit() < CREDIT_PACKAGES[0].price_per_credit());
        assert_eq!(CreditPackage::find(500).unwrap().price_cents, 3999);
        assert!(matches!(
            CreditPackage::find(7),
            Err(CarbonError::InvalidOption(_))
        ));
    }
}
