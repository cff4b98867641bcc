//! Tunable constants of the wallet engine
use super::types::Money;
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Every amount is in MRU. Loaded from TOML so product can adjust fees and
/// thresholds without a code change; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Balance a member needs to be promoted and to be assigned reviews
    pub member_min_balance: Money,
    /// Paid to a member for each deposit they approve
    pub member_approval_reward: Money,
    pub ex_member_activation_cost: Money,
    pub ex_member_monthly_fee: Money,
    pub report_penalty: Money,
    pub post_cost: Money,
    pub initial_free_posts: u32,
    /// Promotional balance credited at registration, may be zero
    pub signup_bonus: Money,
    pub store_retry_attempts: u32,
    pub store_retry_backoff_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            member_min_balance: Money::mru(1000),
            member_approval_reward: Money::mru(5),
            ex_member_activation_cost: Money::mru(2000),
            ex_member_monthly_fee: Money::mru(500),
            report_penalty: Money::mru(500),
            post_cost: Money::mru(50),
            initial_free_posts: 3,
            signup_bonus: Money::ZERO,
            store_retry_attempts: 3,
            store_retry_backoff_ms: 50,
        }
    }
}

impl WalletConfig {
    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let config: WalletConfig =
            toml::from_str(contents).context("failed to parse wallet config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let fees = [
            ("member_min_balance", self.member_min_balance),
            ("member_approval_reward", self.member_approval_reward),
            ("ex_member_activation_cost", self.ex_member_activation_cost),
            ("ex_member_monthly_fee", self.ex_member_monthly_fee),
            ("report_penalty", self.report_penalty),
            ("post_cost", self.post_cost),
        ];
        for (name, amount) in fees {
            anyhow::ensure!(amount.is_positive(), "{name} must be positive, got {amount}");
        }
        anyhow::ensure!(
            !self.signup_bonus.is_negative(),
            "signup_bonus must not be negative, got {}",
            self.signup_bonus
        );
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.store_retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config = WalletConfig::from_toml_str(
            r#"
            member_min_balance = "1500"
            report_penalty = 750
            "#,
        )
        .unwrap();

        assert_eq!(config.member_min_balance, Money::mru(1500));
        assert_eq!(config.report_penalty, Money::mru(750));
        assert_eq!(config.member_approval_reward, Money::mru(5));
        assert_eq!(config.initial_free_posts, 3);
    }

    #[test]
    fn rejects_non_positive_fees() {
        let err = WalletConfig::from_toml_str(r#"post_cost = "0""#).unwrap_err();
        assert!(err.to_string().contains("post_cost"));
    }
}
