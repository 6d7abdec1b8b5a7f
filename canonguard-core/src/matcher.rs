// canonguard-core/src/matcher.rs
//! Decides which template, if any, an incoming fingerprint belongs to.

use log::debug;

use crate::fingerprint::Fingerprint;
use crate::index::{Template, TemplateIndex};

/// Equivalence between two fingerprints.
///
/// The four identity fields must be exactly equal. The submission sequence only
/// narrows the match when both sides carry one; absence on either side is never
/// a mismatch, so a sequence-less template matches every submission.
pub fn fingerprints_match(a: &Fingerprint, b: &Fingerprint) -> bool {
    if a.identity() != b.identity() {
        return false;
    }
    match (a.sequence(), b.sequence()) {
        (Some(x), Some(y)) => x == y,
        _ => true,
    }
}

/// Returns the first template in index order whose fingerprint matches `target`.
pub fn find_match<'a>(target: &Fingerprint, index: &'a TemplateIndex) -> Option<&'a Template> {
    let found = index
        .all()
        .iter()
        .find(|template| fingerprints_match(target, &template.fingerprint));
    match found {
        Some(t) => debug!("Fingerprint {:?} matches template '{}'", target.identity(), t.name),
        None => debug!("No template matches fingerprint {:?}", target.identity()),
    }
    found
}
