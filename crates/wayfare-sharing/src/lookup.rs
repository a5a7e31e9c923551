use crate::error::SharingError;

/// Outcome of a read that may be served from the local cache.
#[derive(Debug)]
pub enum Lookup<T> {
    /// Read from the document store.
    Fresh(T),
    /// The store was unreachable; this is the last cached result.
    Degraded {
        stale: T,
        cached_at_ms: i64,
        reason: String,
    },
    /// Nothing could be read.
    Failed(SharingError),
}

impl<T> Lookup<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Lookup::Fresh(_))
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Lookup::Degraded { .. })
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Lookup::Fresh(value) | Lookup::Degraded { stale: value, .. } => Some(value),
            Lookup::Failed(_) => None,
        }
    }

    /// Fresh or stale value; the error when nothing was available.
    pub fn into_result(self) -> Result<T, SharingError> {
        match self {
            Lookup::Fresh(value) | Lookup::Degraded { stale: value, .. } => Ok(value),
            Lookup::Failed(e) => Err(e),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Fresh(value) => Lookup::Fresh(f(value)),
            Lookup::Degraded {
                stale,
                cached_at_ms,
                reason,
            } => Lookup::Degraded {
                stale: f(stale),
                cached_at_ms,
                reason,
            },
            Lookup::Failed(e) => Lookup::Failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_and_map() {
        let fresh = Lookup::Fresh(vec![1, 2]).map(|v| v.len());
        assert_eq!(fresh.value(), Some(&2));
        assert!(fresh.is_fresh());

        let degraded = Lookup::Degraded {
            stale: 3,
            cached_at_ms: 10,
            reason: "offline".into(),
        };
        assert!(degraded.is_degraded());
        assert_eq!(degraded.value(), Some(&3));

        let failed: Lookup<u8> = Lookup::Failed(SharingError::NoPermissions);
        assert!(failed.value().is_none());
        assert!(failed.into_result().is_err());
    }
}
