//! Subscriber installation

use std::str::FromStr;
use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Output profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Compact text at debug level
    Development,
    /// One JSON object per event at info level
    Production,
    /// Registry only, for capture layers installed by tests
    Test,
}

impl Profile {
    fn filter(self) -> EnvFilter {
        // RUST_LOG wins over the profile
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(match self {
                Profile::Development => "entimap_core=debug,entimap_store=debug",
                Profile::Production => "entimap_core=info,entimap_store=info",
                Profile::Test => "off",
            })
        })
    }
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Profile::Development),
            "prod" | "production" => Ok(Profile::Production),
            "test" => Ok(Profile::Test),
            other => Err(format!("unknown logging profile: {}", other)),
        }
    }
}

static INSTALLED: Once = Once::new();

/// Install the process subscriber for `profile`
///
/// Only the first call in a process has any effect. If some other
/// subscriber is already global, it is left in place.
pub fn init(profile: Profile) {
    INSTALLED.call_once(|| {
        let installed = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .compact()
                .with_env_filter(profile.filter())
                .finish()
                .try_init(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(profile.filter())
                .finish()
                .try_init(),
            Profile::Test => tracing_subscriber::registry().try_init(),
        };
        if installed.is_err() {
            tracing::debug!(?profile, "global subscriber already set");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init(Profile::Test);
        init(Profile::Production);
    }

    #[test]
    fn test_profile_names() {
        assert_eq!("dev".parse::<Profile>(), Ok(Profile::Development));
        assert_eq!("Production".parse::<Profile>(), Ok(Profile::Production));
        assert!("verbose".parse::<Profile>().is_err());
    }
}
