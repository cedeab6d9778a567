//! Classify AWS CLI stderr into the typed error taxonomy.
//!
//! The CLI collapses every failure to a non-zero exit; the error code in
//! stderr is what distinguishes expected absence, expected presence,
//! throttling, and genuine failures.

use deploykit_core::Error;

const NOT_FOUND: &[&str] = &[
    "ResourceNotFoundException",
    "NoSuchEntity",
    "NoSuchBucket",
    "ParameterNotFound",
    "RepositoryNotFoundException",
    "StackSetNotFoundException",
    "does not exist",
    "404",
];

const ALREADY_EXISTS: &[&str] = &[
    "AlreadyExistsException",
    "EntityAlreadyExists",
    "ResourceExistsException",
    "RepositoryAlreadyExistsException",
    "BucketAlreadyOwnedByYou",
    "No updates are to be performed",
];

const TRANSIENT: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "Rate exceeded",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "ServiceUnavailable",
    "InternalFailure",
    "RequestTimeout",
    "Connection was closed",
    // IAM deletions lag policy detachment; retry instead of failing.
    "DeleteConflict",
];

/// Map one failed invocation's stderr to an error variant.
pub fn classify_stderr(context: &str, stderr: &str) -> Error {
    let matches = |needles: &[&str]| needles.iter().any(|n| stderr.contains(n));

    if matches(NOT_FOUND) {
        Error::NotFound(context.to_string())
    } else if matches(ALREADY_EXISTS) {
        Error::AlreadyExists(context.to_string())
    } else if matches(TRANSIENT) {
        Error::Transient(format!("{context}: {}", first_line(stderr)))
    } else {
        Error::Provider(format!("{context}: {}", first_line(stderr)))
    }
}

fn first_line(s: &str) -> &str {
    s.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}
