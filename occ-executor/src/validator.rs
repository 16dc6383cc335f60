//! Read-set validation.

use crate::mvs::{MultiVersionStore, MvsRead};
use crate::types::{ReadOrigin, StateKey, TxnIndex, Version};

/// Outcome of validating one incarnation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    /// Every read still resolves to the exact version it observed.
    Valid,
    /// A read now resolves elsewhere; the incarnation must be aborted.
    Conflict(Conflict),
    /// A newer incarnation already replaced the one being validated.
    Stale,
}

/// The first read found to be out of date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub key: StateKey,
    pub observed: ReadOrigin,
    pub current: CurrentOrigin,
}

/// Where a key resolves at validation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentOrigin {
    Versioned(Version),
    Storage,
    Estimate(TxnIndex),
}

/// Checks captured read sets against the current contents of the store.
pub struct Validator<'a> {
    mvs: &'a MultiVersionStore,
}

impl<'a> Validator<'a> {
    pub fn new(mvs: &'a MultiVersionStore) -> Self {
        Self { mvs }
    }

    /// Validates `version` against the read set its incarnation recorded.
    ///
    /// Reads compare by version identity: the same value reached through a
    /// different writer is still a conflict.
    pub fn validate(&self, version: Version) -> ValidationOutcome {
        let reader = version.txn_idx;
        self.mvs
            .with_read_set(reader, |incarnation, reads| {
                if incarnation != version.incarnation {
                    return ValidationOutcome::Stale;
                }
                for (key, &observed) in reads {
                    let current = match self.mvs.read(key, reader) {
                        MvsRead::Versioned(v, _) => CurrentOrigin::Versioned(v),
                        MvsRead::Storage => CurrentOrigin::Storage,
                        MvsRead::Estimate(writer) => CurrentOrigin::Estimate(writer),
                    };
                    let matches = match (observed, current) {
                        (ReadOrigin::Storage, CurrentOrigin::Storage) => true,
                        (ReadOrigin::Versioned(seen), CurrentOrigin::Versioned(now)) => seen == now,
                        _ => false,
                    };
                    if !matches {
                        return ValidationOutcome::Conflict(Conflict {
                            key: key.clone(),
                            observed,
                            current,
                        });
                    }
                }
                ValidationOutcome::Valid
            })
            .unwrap_or(ValidationOutcome::Stale)
    }
}
