//! ID resolver module
//!
//! Resolves job ID prefixes to full UUIDs by listing the agent's jobs, so
//! users can type short, unambiguous prefixes instead of full UUIDs.

use anyhow::{Context, Result, anyhow};
use launchpad_client::LaunchClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, lists the agent's jobs and finds the one matching the prefix.
///
/// # Errors
/// Returns an error if:
/// - No job matches the prefix
/// - Multiple jobs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_job_id(client: &LaunchClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let jobs = client
        .list_jobs()
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    match_prefix(jobs.iter().map(|j| j.id), &id_or_prefix.as_str())
}

/// Picks the single id starting with `prefix`
fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let prefix = prefix.to_lowercase();
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(&prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_prefix() {
        let a = Uuid::parse_str("1a2b3c4d-0000-4000-8000-000000000001").unwrap();
        let b = Uuid::parse_str("1a2f0000-0000-4000-8000-000000000002").unwrap();
        let ids = [a, b];

        assert_eq!(match_prefix(ids.into_iter(), "1A2B").unwrap(), a);

        let err = match_prefix(ids.into_iter(), "1a2").unwrap_err();
        assert!(err.to_string().starts_with("Ambiguous prefix"));

        let err = match_prefix(ids.into_iter(), "ff").unwrap_err();
        assert!(err.to_string().starts_with("No job found"));
    }
}
