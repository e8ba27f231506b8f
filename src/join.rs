//! Joining the results of fan-out branches.

use anyhow::{anyhow, Result};

/// Collapse branch results into one, keeping every failure.
///
/// A single failure is returned as-is so its context chain (and any typed
/// context such as a stage label) stays downcastable. Several failures are
/// joined into one message.
pub fn join_results<I>(results: I) -> Result<()>
where
    I: IntoIterator<Item = Result<()>>,
{
    let mut errors: Vec<anyhow::Error> = results.into_iter().filter_map(Result::err).collect();
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        n => {
            let joined = errors
                .iter()
                .map(|e| format!("  - {:#}", e))
                .collect::<Vec<_>>()
                .join("\n");
            Err(anyhow!("{} concurrent steps failed:\n{}", n, joined))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_ok() {
        assert!(join_results(vec![Ok(()), Ok(())]).is_ok());
    }

    #[test]
    fn test_single_error_passes_through() {
        let err = join_results(vec![Ok(()), Err(anyhow!("boom"))]).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_multiple_errors_are_all_reported() {
        let err = join_results(vec![Err(anyhow!("first")), Ok(()), Err(anyhow!("second"))])
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 concurrent steps failed"));
        assert!(msg.contains("first"));
        assert!(msg.contains("second"));
    }
}
