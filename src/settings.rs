use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Postgres {
    // without a url the service runs on the in-memory ledger
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Ledger {
    pub min_deposit: Decimal,
    pub min_withdraw: Decimal,
    pub min_topup: Decimal,
    pub default_interest_rate: Decimal,
    pub referral_bonus_percent: Decimal,
    pub payout_address_prefix: String,
    pub payout_address_length: usize,
    pub topup_address: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Accruals {
    pub check_interval_secs: u64,
    pub per_deposit_timeout_secs: u64,
    pub concurrency: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Http {
    pub listen: String,
    /// Shared secret the front end sends in `x-admin-token` on `/admin` routes.
    pub admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Notifier {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Admin {
    pub ids: Vec<i64>,
    pub default_password: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub postgres: Postgres,
    #[serde(default)]
    pub ledger: Ledger,
    #[serde(default)]
    pub accruals: Accruals,
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub notifier: Notifier,
    #[serde(default)]
    pub admin: Admin,
}

impl Default for Postgres {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            min_deposit: Decimal::TEN,
            min_withdraw: Decimal::TEN,
            min_topup: Decimal::TEN,
            default_interest_rate: Decimal::ONE,
            referral_bonus_percent: Decimal::new(5, 0),
            payout_address_prefix: "T".to_string(),
            payout_address_length: 34,
            topup_address: String::new(),
        }
    }
}

impl Default for Accruals {
    fn default() -> Self {
        Self {
            check_interval_secs: 3600,
            per_deposit_timeout_secs: 10,
            concurrency: 4,
        }
    }
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            admin_token: None,
        }
    }
}

impl Default for Admin {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            default_password: "123".to_string(),
        }
    }
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("admin.ids")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = Config::builder()
            .add_source(config::File::from_str(
                "[postgres]\nurl = \"postgres://localhost/ledger\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = config.try_deserialize().unwrap();

        assert_eq!(settings.postgres.max_connections, 5);
        assert_eq!(settings.ledger.min_deposit, Decimal::TEN);
        assert_eq!(settings.ledger.referral_bonus_percent, Decimal::new(5, 0));
        assert_eq!(settings.ledger.payout_address_length, 34);
        assert_eq!(settings.accruals.concurrency, 4);
        assert_eq!(settings.http.listen, "0.0.0.0:8080");
        assert!(settings.http.admin_token.is_none());
        assert!(settings.notifier.url.is_none());
    }
}
