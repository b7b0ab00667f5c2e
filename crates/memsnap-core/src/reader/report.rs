use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// One host field (or whole host type) that could not be bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BindFailure {
    pub host: String,
    pub record: String,
    /// `None` when the type as a whole failed (e.g. unknown record).
    pub field: Option<String>,
    pub reason: String,
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "could not bind field {} of type {} (record {}): {}",
                field, self.host, self.record, self.reason
            ),
            None => write!(
                f,
                "could not bind type {} to record {}: {}",
                self.host, self.record, self.reason
            ),
        }
    }
}

/// Every failure of one bind attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BindReport {
    pub failures: Vec<BindFailure>,
}

impl BindReport {
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for BindReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {}", failure)?;
        }
        Ok(())
    }
}

/// Dry-run compatibility of a set of host types against one version.
#[derive(Debug, Clone, Serialize)]
pub struct CompatReport {
    pub version: String,
    pub identity: String,
    pub source: PathBuf,
    /// Host types that bound cleanly, in visiting order.
    pub bound: Vec<String>,
    pub failures: Vec<BindFailure>,
}

impl CompatReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn bind_report(&self) -> BindReport {
        BindReport {
            failures: self.failures.clone(),
        }
    }
}

impl fmt::Display for CompatReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Version {} ({}) from {}",
            self.version,
            self.identity,
            self.source.display()
        )?;
        if self.is_ok() {
            write!(f, "  all {} types bind", self.bound.len())
        } else {
            writeln!(
                f,
                "  {} types bind, {} failures:",
                self.bound.len(),
                self.failures.len()
            )?;
            write!(f, "{}", self.bind_report())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_messages() {
        let field = BindFailure {
            host: "Unit".into(),
            record: "unit".into(),
            field: Some("hp".into()),
            reason: "missing".into(),
        };
        assert_eq!(
            field.to_string(),
            "could not bind field hp of type Unit (record unit): missing"
        );

        let whole = BindFailure {
            field: None,
            ..field.clone()
        };
        assert!(whole.to_string().starts_with("could not bind type Unit"));

        let report = BindReport {
            failures: vec![field, whole],
        };
        assert_eq!(report.to_string().lines().count(), 2);
    }

    #[test]
    fn test_compat_report_display() {
        let report = CompatReport {
            version: "1.0".into(),
            identity: "abcd".into(),
            source: PathBuf::from("layouts/game.toml"),
            bound: vec!["Unit".into()],
            failures: Vec::new(),
        };
        assert!(report.is_ok());
        assert!(report.to_string().contains("all 1 types bind"));
    }
}
