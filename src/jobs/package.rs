//! Package install and removal
//!
//! Both complete when the package service calls back, whatever the result
//! code. A call that cannot be issued completes the job as failed at once.

use crate::domain::JobOutcome;
use crate::engine::{CompletionHandle, SharedCompletion};
use crate::system::{PackageCallback, PackageResult, PackageService};

fn outcome_of(operation: &str, target: &str, result: &PackageResult) -> JobOutcome {
    if result.is_success() {
        JobOutcome::Completed
    } else {
        JobOutcome::Failed(format!("{operation} {target}: {result}"))
    }
}

/// Callback that logs the result and signals the shared completion
fn on_result(operation: &'static str, target: &str, completion: SharedCompletion) -> PackageCallback {
    let target = target.to_string();
    Box::new(move |result: PackageResult| {
        let job_id = completion.job_id();
        if result.is_success() {
            tracing::info!(job_id = %job_id, operation, target = %target, "Package operation finished");
        } else {
            tracing::warn!(job_id = %job_id, operation, target = %target, result = %result, "Package operation failed");
        }
        completion.complete(outcome_of(operation, &target, &result));
    })
}

pub fn install(packages: &dyn PackageService, path: &str, completion: CompletionHandle) {
    let completion = completion.shared();
    tracing::info!(job_id = %completion.job_id(), path, "Installing package");

    if let Err(e) = packages.install(path, on_result("install", path, completion.clone())) {
        tracing::error!(job_id = %completion.job_id(), path, error = %e, "Install could not be issued");
        completion.complete(JobOutcome::Failed(format!("install {path}: {e}")));
    }
}

pub fn remove(packages: &dyn PackageService, name: &str, disable_overlay_first: bool, completion: CompletionHandle) {
    let completion = completion.shared();
    tracing::info!(job_id = %completion.job_id(), name, disable_overlay_first, "Removing package");

    if disable_overlay_first {
        if let Err(e) = packages.set_overlay_enabled(name, false) {
            tracing::warn!(job_id = %completion.job_id(), name, error = %e, "Failed to disable overlay before removal");
        }
    }

    if let Err(e) = packages.delete(name, on_result("delete", name, completion.clone())) {
        tracing::error!(job_id = %completion.job_id(), name, error = %e, "Delete could not be issued");
        completion.complete(JobOutcome::Failed(format!("delete {name}: {e}")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::completion;
    use crate::id::JobIdSequence;
    use crate::system::{RecordingSystem, SystemCall};

    #[test]
    fn test_install_completes_on_callback() {
        let system = RecordingSystem::manual();
        let (sender, mut inbox) = completion::channel();
        let id = JobIdSequence::new().next_id();

        install(&system, "/a.apk", sender.handle_for(id));

        assert!(inbox.try_recv().is_none());
        system.finish_next(PackageResult::success());
        let event = inbox.try_recv().unwrap();
        assert_eq!(event.id, id);
        assert_eq!(event.outcome, JobOutcome::Completed);
    }

    #[test]
    fn test_install_failure_code_still_completes() {
        let system = RecordingSystem::manual();
        let (sender, mut inbox) = completion::channel();
        let id = JobIdSequence::new().next_id();

        install(&system, "/bad.apk", sender.handle_for(id));
        system.finish_next(PackageResult::failure(-2, "INSTALL_FAILED_INVALID_APK"));

        assert_eq!(
            inbox.try_recv().unwrap().outcome,
            JobOutcome::Failed("install /bad.apk: code -2: INSTALL_FAILED_INVALID_APK".into())
        );
    }

    #[test]
    fn test_install_not_issued_fails_immediately() {
        let system = RecordingSystem::manual();
        system.fail("install");
        let (sender, mut inbox) = completion::channel();
        let id = JobIdSequence::new().next_id();

        install(&system, "/a.apk", sender.handle_for(id));

        let outcome = inbox.try_recv().unwrap().outcome;
        assert!(matches!(outcome, JobOutcome::Failed(reason) if reason.starts_with("install /a.apk")));
        assert!(inbox.try_recv().is_none());
    }

    #[test]
    fn test_remove_disables_overlay_first() {
        let system = RecordingSystem::manual();
        let (sender, mut inbox) = completion::channel();
        let id = JobIdSequence::new().next_id();

        remove(&system, "pkg.x", true, sender.handle_for(id));
        system.finish_next(PackageResult::success());

        assert_eq!(
            system.calls(),
            vec![
                SystemCall::SetOverlayEnabled {
                    name: "pkg.x".into(),
                    enabled: false
                },
                SystemCall::DeletePackage("pkg.x".into()),
            ]
        );
        assert_eq!(inbox.try_recv().unwrap().outcome, JobOutcome::Completed);
    }

    #[test]
    fn test_remove_continues_when_disable_fails() {
        let system = RecordingSystem::manual();
        system.fail("set_overlay_enabled");
        let (sender, _inbox) = completion::channel();

        remove(&system, "pkg.x", true, sender.handle_for(JobIdSequence::new().next_id()));

        assert_eq!(system.calls(), vec![SystemCall::DeletePackage("pkg.x".into())]);
        assert_eq!(system.pending_callbacks(), 1);
    }

    #[test]
    fn test_remove_without_disable() {
        let system = RecordingSystem::manual();
        let (sender, _inbox) = completion::channel();

        remove(&system, "pkg.x", false, sender.handle_for(JobIdSequence::new().next_id()));

        assert_eq!(system.calls(), vec![SystemCall::DeletePackage("pkg.x".into())]);
    }
}
