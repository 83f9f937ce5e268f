//! Serde helpers shared by the configuration types

/// Serialize `std::time::Duration` as whole seconds
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Retry {
///     #[serde(with = "vw_core::config::duration_secs")]
///     delay: Duration,
/// }
/// ```
pub mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Probe {
        #[serde(with = "duration_secs")]
        delay: Duration,
    }

    #[test]
    fn test_duration_as_seconds_in_json() {
        let probe = Probe {
            delay: Duration::from_secs(10),
        };
        assert_eq!(serde_json::to_string(&probe).unwrap(), r#"{"delay":10}"#);

        let parsed: Probe = serde_json::from_str(r#"{"delay":45}"#).unwrap();
        assert_eq!(parsed.delay, Duration::from_secs(45));
    }
}
