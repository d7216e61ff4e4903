use std::sync::Arc;

use crate::clock::Clock;
use crate::db::JobRepository;
use crate::services::{
    access::AccessGate, auth::TokenVerifier, expiry::ExpiryManager, queue::JobDispatcher,
    storage::BlobStore, submission::SubmissionService,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn JobRepository>,
    pub dispatcher: Arc<dyn JobDispatcher>,
    pub clock: Arc<dyn Clock>,
    pub verifier: Arc<TokenVerifier>,
    pub submissions: Arc<SubmissionService>,
    pub gate: Arc<AccessGate>,
    pub public_base_url: Arc<str>,
}

impl AppState {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        storage: Arc<dyn BlobStore>,
        dispatcher: Arc<dyn JobDispatcher>,
        clock: Arc<dyn Clock>,
        verifier: TokenVerifier,
        expiry: ExpiryManager,
        public_base_url: &str,
    ) -> Self {
        let submissions = SubmissionService::new(
            repo.clone(),
            storage.clone(),
            dispatcher.clone(),
            clock.clone(),
            expiry,
        );
        let gate = AccessGate::new(repo.clone(), storage, clock.clone(), expiry);

        Self {
            repo,
            dispatcher,
            clock,
            verifier: Arc::new(verifier),
            submissions: Arc::new(submissions),
            gate: Arc::new(gate),
            public_base_url: Arc::from(public_base_url.trim_end_matches('/')),
        }
    }
}
