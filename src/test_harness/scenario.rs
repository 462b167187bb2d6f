//! Declarative send scenarios.
//!
//! Describe a sequence of sends with what the node does to each one and what
//! the caller should see, then let the scenario drive a
//! `SyncTransactionClient` against the mocks and compare.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{anyhow, Result};

use super::{MockChain, MockSigner, MockSubmitter, RecordingStatusSink, Scripted};
use crate::ext::{NonceStatus, StatusNotice, SyncTransactionClient, TxRequest};

// ============================================================================
// Expected outcome
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    Settled,
    /// Fails with an error carrying this title.
    Fails(&'static str),
}

impl Expect {
    fn describe(&self) -> &'static str {
        match self {
            Expect::Settled => "settled",
            Expect::Fails(title) => *title,
        }
    }
}

// ============================================================================
// SendStep
// ============================================================================

/// One send within a scenario.
#[derive(Debug, Clone)]
pub struct SendStep {
    pub name: String,
    pub script: Scripted,
    pub expect: Expect,
    /// Network transaction count from this step on
    pub chain_nonce: Option<u64>,
    pub signer_rejects: bool,
}

impl SendStep {
    pub fn settles(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Scripted::success(),
            expect: Expect::Settled,
            chain_nonce: None,
            signer_rejects: false,
        }
    }

    pub fn fails(name: impl Into<String>, script: Scripted, title: &'static str) -> Self {
        Self {
            name: name.into(),
            script,
            expect: Expect::Fails(title),
            chain_nonce: None,
            signer_rejects: false,
        }
    }

    /// Set the network's transaction count before this step is sent.
    pub fn with_chain_nonce(mut self, nonce: u64) -> Self {
        self.chain_nonce = Some(nonce);
        self
    }

    /// The signer declines this step; nothing is submitted.
    pub fn rejected_by_signer(mut self) -> Self {
        self.signer_rejects = true;
        self
    }
}

// ============================================================================
// SendScenario
// ============================================================================

/// Builder and runner for a sequence of sends.
///
/// # Example
///
/// ```ignore
/// SendScenario::new("revert resyncs", 5)
///     .step(SendStep::settles("first"))
///     .step(SendStep::fails("second", Scripted::reverted(), "Transaction reverted").with_chain_nonce(7))
///     .step(SendStep::settles("third"))
///     .run()
///     .await
///     .unwrap()
///     .assert_passed();
/// ```
pub struct SendScenario {
    name: String,
    start_nonce: u64,
    balance: U256,
    steps: Vec<SendStep>,
}

impl SendScenario {
    pub fn new(name: impl Into<String>, start_nonce: u64) -> Self {
        Self {
            name: name.into(),
            start_nonce,
            balance: U256::ZERO,
            steps: Vec::new(),
        }
    }

    pub fn balance(mut self, balance: U256) -> Self {
        self.balance = balance;
        self
    }

    pub fn step(mut self, step: SendStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Shared client over fresh mocks, for tests that drive sends directly.
    pub fn client(start_nonce: u64) -> (SyncTransactionClient, Mocks) {
        let mocks = Mocks {
            chain: MockChain::new(start_nonce),
            submitter: MockSubmitter::new(),
            signer: MockSigner::new(Address::repeat_byte(0x01)),
            status: RecordingStatusSink::new(),
        };
        let client = SyncTransactionClient::new(
            6342,
            mocks.chain.clone(),
            mocks.submitter.clone(),
            mocks.signer.clone(),
        )
        .with_status_sink(mocks.status.clone());
        (client, mocks)
    }

    pub async fn run(self) -> Result<ScenarioResult> {
        println!("\n{}", "=".repeat(60));
        println!("Scenario: {}", self.name);
        println!("{}\n", "=".repeat(60));

        let (client, mocks) = Self::client(self.start_nonce);
        let Mocks {
            chain,
            submitter,
            signer,
            status,
        } = mocks;
        chain.set_balance(self.balance);

        let mut results = Vec::with_capacity(self.steps.len());
        for (i, step) in self.steps.into_iter().enumerate() {
            if let Some(nonce) = step.chain_nonce {
                chain.set_nonce(nonce);
            }
            signer.set_rejecting(step.signer_rejects);
            if !step.signer_rejects {
                submitter.push(step.script.clone());
            }
            let before = signer.requests().len();

            let outcome = client
                .send_transaction(TxRequest::new(Address::repeat_byte(0xbb)))
                .await;

            let nonce = signer.requests().get(before).map(|tx| tx.nonce);
            let actual = match &outcome {
                Ok(_) => "settled",
                Err(e) => e.title(),
            };
            let passed = actual == step.expect.describe();
            println!(
                "  {} [{}] '{}' nonce={:?}: expected {}, got {}",
                if passed { "PASS" } else { "FAIL" },
                i,
                step.name,
                nonce,
                step.expect.describe(),
                actual
            );

            results.push(StepResult {
                name: step.name,
                nonce,
                expected: step.expect,
                actual: actual.to_string(),
                passed,
            });
        }

        let nonce_status = client.nonce_manager().status().await;
        println!(
            "\n  current_nonce={}, pending={}, initialized={}, chain reads={}",
            nonce_status.current_nonce,
            nonce_status.pending_count,
            nonce_status.initialized,
            chain.count_calls()
        );

        let submitted = submitter.submitted().len();
        let signed = results.iter().filter(|r| r.nonce.is_some()).count();
        if submitted > signed {
            return Err(anyhow!("{submitted} submissions for {signed} signed steps"));
        }
        let all_passed = results.iter().all(|r| r.passed);

        Ok(ScenarioResult {
            name: self.name,
            all_passed,
            steps: results,
            nonce_status,
            chain_reads: chain.count_calls(),
            notices: status.notices(),
        })
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug)]
pub struct StepResult {
    pub name: String,
    /// Nonce the step was signed with; `None` if it never reached the signer
    pub nonce: Option<u64>,
    pub expected: Expect,
    pub actual: String,
    pub passed: bool,
}

#[derive(Debug)]
pub struct ScenarioResult {
    pub name: String,
    pub all_passed: bool,
    pub steps: Vec<StepResult>,
    pub nonce_status: NonceStatus,
    pub chain_reads: usize,
    pub notices: Vec<StatusNotice>,
}

impl ScenarioResult {
    pub fn assert_passed(&self) {
        assert!(
            self.all_passed,
            "Scenario '{}' failed: {:?}",
            self.name,
            self.steps.iter().filter(|r| !r.passed).collect::<Vec<_>>()
        );
    }

    pub fn nonces(&self) -> Vec<Option<u64>> {
        self.steps.iter().map(|s| s.nonce).collect()
    }
}

/// The doubles behind a client built by `SendScenario::client`.
#[derive(Debug, Clone)]
pub struct Mocks {
    pub chain: Arc<MockChain>,
    pub submitter: Arc<MockSubmitter>,
    pub signer: Arc<MockSigner>,
    pub status: Arc<RecordingStatusSink>,
}
