//! Ordered execution of offer/answer steps.
//!
//! A worker owns one transport generation. Steps run strictly in submission
//! order and each completion is posted back as a [`CallNotice`]. Dropping the
//! worker aborts whatever step is in flight.

use crate::peer::transport::{NoticeSender, PeerTransport};
use crate::peer::types::{IceCandidate, SessionDescription};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationStep {
    /// Offering side: open chat channel, create offer, set it locally
    CreateOffer,
    /// Answering side: set remote offer, create answer, set it locally
    AcceptOffer(SessionDescription),
    /// Offering side: set the remote answer
    AcceptAnswer(SessionDescription),
    AddCandidate(IceCandidate),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NegotiationOutcome {
    OfferReady(SessionDescription),
    RemoteDescriptionSet,
    AnswerReady(SessionDescription),
    CandidateApplied,
    Failed { step: &'static str, error: String },
}

pub struct NegotiationWorker {
    steps: mpsc::UnboundedSender<NegotiationStep>,
    task: JoinHandle<()>,
}

impl NegotiationWorker {
    pub fn spawn(transport: Arc<dyn PeerTransport>, notices: NoticeSender) -> Self {
        let (steps, mut rx) = mpsc::unbounded_channel::<NegotiationStep>();
        let task = tokio::spawn(async move {
            while let Some(step) = rx.recv().await {
                run_step(transport.as_ref(), step, &notices).await;
            }
        });
        Self { steps, task }
    }

    pub fn submit(&self, step: NegotiationStep) -> bool {
        self.steps.send(step).is_ok()
    }
}

impl Drop for NegotiationWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_step(transport: &dyn PeerTransport, step: NegotiationStep, notices: &NoticeSender) {
    let generation = notices.generation();
    let outcome = match step {
        NegotiationStep::CreateOffer => {
            let result = async {
                transport.open_data_channel().await?;
                let offer = transport.create_offer().await?;
                transport.set_local_description(offer.clone()).await?;
                Ok::<_, crate::error::Error>(offer)
            }
            .await;
            match result {
                Ok(offer) => NegotiationOutcome::OfferReady(offer),
                Err(err) => failed("create-offer", err),
            }
        }
        NegotiationStep::AcceptOffer(offer) => {
            if let Err(err) = transport.set_remote_description(offer).await {
                notices.negotiation(failed("set-remote-offer", err));
                return;
            }
            notices.negotiation(NegotiationOutcome::RemoteDescriptionSet);
            let result = async {
                let answer = transport.create_answer().await?;
                transport.set_local_description(answer.clone()).await?;
                Ok::<_, crate::error::Error>(answer)
            }
            .await;
            match result {
                Ok(answer) => NegotiationOutcome::AnswerReady(answer),
                Err(err) => failed("create-answer", err),
            }
        }
        NegotiationStep::AcceptAnswer(answer) => {
            match transport.set_remote_description(answer).await {
                Ok(()) => NegotiationOutcome::RemoteDescriptionSet,
                Err(err) => failed("set-remote-answer", err),
            }
        }
        NegotiationStep::AddCandidate(candidate) => {
            match transport.add_ice_candidate(candidate).await {
                Ok(()) => NegotiationOutcome::CandidateApplied,
                Err(err) => failed("add-candidate", err),
            }
        }
    };
    tracing::trace!(generation, ?outcome, "negotiation step finished");
    notices.negotiation(outcome);
}

fn failed(step: &'static str, err: crate::error::Error) -> NegotiationOutcome {
    NegotiationOutcome::Failed {
        step,
        error: err.to_string(),
    }
}
