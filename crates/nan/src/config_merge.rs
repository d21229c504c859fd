// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

//! Folds the set of currently-connected clients' [`ConfigRequest`]s into a
//! single effective [`GlobalConfig`], and decides whether a newly-joining
//! client's request is compatible with that set.

use crate::types::{ConfigRequest, GlobalConfig};

/// Merge a set of per-client requests into the effective config to program
/// into the driver. `None` if the set is empty (no clients connected).
pub fn merge<'a>(configs: impl Iterator<Item = &'a ConfigRequest>) -> Option<GlobalConfig> {
    configs.copied().reduce(|acc, c| ConfigRequest {
        master_preference: acc.master_preference.max(c.master_preference),
        cluster_low: acc.cluster_low.min(c.cluster_low),
        cluster_high: acc.cluster_high.max(c.cluster_high),
        support_5g: acc.support_5g || c.support_5g,
        enable_identity_change_callback: acc.enable_identity_change_callback
            || c.enable_identity_change_callback,
    })
}

/// Whether `candidate` can join the set of `existing` clients without
/// forcing the already-active radio configuration to change shape: the
/// candidate's own cluster bounds must be a valid non-empty range, and must
/// already fit inside the window the existing clients merged to (joining
/// may narrow, never widen, the active cluster range). `support5g` may only
/// transition `false -> true`, never the reverse, while joining — this
/// direction can't actually be violated by the OR-merge rule above (adding
/// a client is monotonic), but the check is kept explicit so the invariant
/// is enforced at the source of truth rather than relied on implicitly.
///
/// An empty `existing` set means no radio configuration is active yet, so
/// the first client is always compatible.
pub fn is_compatible(existing: &[ConfigRequest], candidate: &ConfigRequest) -> bool {
    if candidate.cluster_low > candidate.cluster_high {
        return false;
    }

    let Some(before) = merge(existing.iter()) else {
        return true;
    };

    if candidate.cluster_low < before.cluster_low || candidate.cluster_high > before.cluster_high {
        return false;
    }

    let merged_support_5g = before.support_5g || candidate.support_5g;
    if before.support_5g && !merged_support_5g {
        return false;
    }

    true
}

/// Whether `new` demands no more of the driver than what is already
/// `programmed` (component-wise): `new` requires a lower or equal master
/// preference, a narrower or equal cluster range, and `support5g` implies
/// `programmed.support5g`. When true, the driver does not need to be
/// reconfigured for performance — unless `enableIdentityChangeCallback`
/// just flipped on, which always forces a reconfigure (with
/// `notifyIdentityChange=false`) so the event path is armed.
pub fn needs_reconfigure(new: &GlobalConfig, programmed: &GlobalConfig) -> bool {
    let identity_flip_on = new.enable_identity_change_callback && !programmed.enable_identity_change_callback;
    if identity_flip_on {
        return true;
    }

    let dominated = new.master_preference <= programmed.master_preference
        && new.cluster_low >= programmed.cluster_low
        && new.cluster_high <= programmed.cluster_high
        && (!new.support_5g || programmed.support_5g);

    !dominated
}

#[cfg(test)]
#[path = "config_merge_tests.rs"]
mod tests;
