//! Connection reuse sub-protocol.
//!
//! Invitee: send `handshake-reuse`, wait for an answer. Inviter: bind the
//! reused connection to its invitation record and answer with
//! `handshake-reuse-accepted` (or a problem report). The two sides' records
//! are correlated by `(invi_msg_id, reuse_msg_id)` only.

use crate::event_bus::EventBus;
use crate::records::Records;
use crate::waiter;
use chrono::Utc;
use oobx_memory::WriteBatch;
use oobx_types::config::ReusePolicy;
use oobx_types::connection::ConnectionRecord;
use oobx_types::error::{OobError, OobResult};
use oobx_types::event::{Event, EventTopic, ReuseNotice, ReuseOutcome};
use oobx_types::record::{OobRecord, OobRole, OobState};
use oobx_wire::message::ProblemReportReason;
use oobx_wire::{
    ConnectionTargets, DidCommMessage, HandshakeReuse, HandshakeReuseAccept, OobProblemReport,
    Responder,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Run `op`; if it fails, run `notify` before returning the error.
///
/// `notify` is only polled on the failure path.
pub async fn notify_on_failure<T, F, N>(op: F, notify: N) -> OobResult<T>
where
    F: Future<Output = OobResult<T>>,
    N: Future<Output = ()>,
{
    match op.await {
        Ok(value) => Ok(value),
        Err(e) => {
            notify.await;
            Err(e)
        }
    }
}

/// Both halves of the reuse exchange.
pub struct ReuseProtocol {
    records: Records,
    responder: Arc<dyn Responder>,
    targets: Arc<dyn ConnectionTargets>,
    timeout: Duration,
    policy: ReusePolicy,
}

impl ReuseProtocol {
    pub fn new(
        records: Records,
        responder: Arc<dyn Responder>,
        targets: Arc<dyn ConnectionTargets>,
        timeout: Duration,
        policy: ReusePolicy,
    ) -> Self {
        Self {
            records,
            responder,
            targets,
            timeout,
            policy,
        }
    }

    fn bus(&self) -> &EventBus {
        self.records.bus()
    }

    async fn notify(&self, topic: EventTopic, notice: ReuseNotice) {
        self.bus().publish(Event::reuse_notice(topic, notice)).await;
    }

    /// Invitee side: offer `connection` for reuse and wait for the answer.
    ///
    /// Returns the record's state after the wait. Anything but `Accepted`
    /// clears the connection binding and emits one rejection notice.
    pub async fn initiate(
        &self,
        record: &mut OobRecord,
        connection: &ConnectionRecord,
    ) -> OobResult<OobState> {
        let reuse = HandshakeReuse::new(&record.invi_msg_id);
        let reuse_msg_id = reuse.id.clone();
        let targets = self.targets.fetch(connection).await?;
        self.responder
            .send(&DidCommMessage::HandshakeReuse(reuse), &targets)
            .await?;
        info!(
            oob_id = %record.oob_id,
            connection_id = %connection.connection_id,
            reuse_msg_id = %reuse_msg_id,
            "Sent handshake reuse"
        );

        record.reuse_msg_id = Some(reuse_msg_id);
        record.state = OobState::AwaitResponse;
        self.records.save_oob(record).await?;

        let records = &self.records;
        let oob_id = record.oob_id.as_str();
        let waited = waiter::wait_for(
            self.bus(),
            oob_id,
            self.timeout,
            move || async move { records.retrieve_oob(oob_id) },
            |r: &OobRecord| r.state.is_reuse_answered(),
        )
        .await?;
        let timed_out = !waited.is_satisfied();
        *record = waited.into_inner();
        debug!(
            oob_id = %record.oob_id,
            state = %record.state,
            timed_out,
            "Reuse exchange finished"
        );

        // Dropping the binding abandons the exchange; an accept that lands
        // first wins the guarded write and the reload picks it up.
        let oob_id = record.oob_id.clone();
        while record.state != OobState::Accepted {
            record.connection_id = None;
            match self.records.save_oob_if_unchanged(record).await {
                Ok(()) => {
                    self.announce_rejection(record, connection).await;
                    break;
                }
                Err(OobError::StateConflict(_)) => {
                    *record = self.records.retrieve_oob(&oob_id)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(record.state)
    }

    async fn announce_rejection(&self, record: &OobRecord, connection: &ConnectionRecord) {
        let comment = if record.state == OobState::NotAccepted {
            format!(
                "HandshakeReuse rejected, connection {} and invitation {}",
                connection.connection_id, record.invi_msg_id
            )
        } else {
            format!(
                "No HandshakeReuseAccept message received, connection {} and invitation {}",
                connection.connection_id, record.invi_msg_id
            )
        };
        warn!(oob_id = %record.oob_id, state = %record.state, "{comment}");
        self.notify(
            EventTopic::ConnectionReuseAccepted,
            ReuseNotice {
                thread_id: record.reuse_msg_id.clone(),
                connection_id: connection.connection_id.clone(),
                state: Some(ReuseOutcome::Rejected),
                comment,
            },
        )
        .await;
    }

    /// Inviter side: a `handshake-reuse` arrived on `connection_id`.
    pub async fn receive_reuse(&self, reuse: &HandshakeReuse, connection_id: &str) -> OobResult<()> {
        let reuse_msg_id = reuse.thread_id().to_string();
        let invi_msg_id = reuse.invitation_id().map_err(|e| OobError::ReuseHandlingFailed {
            invitation_id: String::new(),
            message_id: reuse_msg_id.clone(),
            reason: e.to_string(),
        })?;

        let result = self
            .accept_reuse(invi_msg_id, &reuse_msg_id, connection_id)
            .await;
        if let Err(OobError::RecordNotFound(reason)) = &result {
            let report = OobProblemReport::new(
                &reuse_msg_id,
                invi_msg_id,
                ProblemReportReason::NoExistingConnection,
                reason.clone(),
            );
            if let Err(e) = self
                .responder
                .send_to_connection(&DidCommMessage::ProblemReport(report), connection_id)
                .await
            {
                warn!(connection_id, error = %e, "Failed to send reuse problem report");
            }
        }
        result.map_err(|e| OobError::ReuseHandlingFailed {
            invitation_id: invi_msg_id.to_string(),
            message_id: reuse_msg_id.clone(),
            reason: e.to_string(),
        })
    }

    async fn accept_reuse(
        &self,
        invi_msg_id: &str,
        reuse_msg_id: &str,
        connection_id: &str,
    ) -> OobResult<()> {
        let mut connection = self.records.retrieve_connection(connection_id)?;
        let targets = self.targets.fetch(&connection).await?;

        let eligible: &[OobState] = match self.policy {
            ReusePolicy::FirstWins => &[OobState::AwaitResponse],
            ReusePolicy::AllowMultiple => &[OobState::AwaitResponse, OobState::Accepted],
        };
        // The eligibility check and the write must see the same record, so
        // a guarded commit that loses a race starts over from the lookup.
        let record = loop {
            let mut record = self
                .records
                .find_oob_by_invitation(invi_msg_id, Some(OobRole::Sender), eligible)?
                .ok_or_else(|| {
                    OobError::RecordNotFound(format!(
                        "no invitation {invi_msg_id} in state {}",
                        eligible
                            .iter()
                            .map(|s| s.as_str())
                            .collect::<Vec<_>>()
                            .join(" or ")
                    ))
                })?;
            let mut batch = WriteBatch::new().require_oob_unchanged(&record);

            let now = Utc::now();
            record.state = OobState::Accepted;
            record.reuse_msg_id = Some(reuse_msg_id.to_string());
            record.connection_id = Some(connection.connection_id.clone());
            record.updated_at = now;
            connection.invitation_msg_id = Some(invi_msg_id.to_string());
            connection.updated_at = now;

            for stale in self.records.find_stale_connections(invi_msg_id)? {
                if stale.connection_id != connection.connection_id {
                    debug!(connection_id = %stale.connection_id, "Dropping stale connection");
                    batch = batch.delete_connection(stale.connection_id);
                }
            }
            match self
                .records
                .commit(batch.save_oob(record.clone()).save_connection(connection.clone()))
                .await
            {
                Ok(()) => break record,
                Err(OobError::StateConflict(reason)) => {
                    debug!(invi_msg_id, reuse_msg_id, %reason, "Reuse raced another writer, re-checking");
                }
                Err(e) => return Err(e),
            }
        };

        let comment = format!(
            "Connection {} is being reused for invitation {invi_msg_id}",
            connection.connection_id
        );
        info!(oob_id = %record.oob_id, reuse_msg_id, "{comment}");
        self.notify(
            EventTopic::ConnectionReuse,
            ReuseNotice {
                thread_id: Some(reuse_msg_id.to_string()),
                connection_id: connection.connection_id.clone(),
                state: Some(ReuseOutcome::Accepted),
                comment,
            },
        )
        .await;

        let accept = HandshakeReuseAccept::new(reuse_msg_id, invi_msg_id);
        self.responder
            .send(&DidCommMessage::HandshakeReuseAccept(accept), &targets)
            .await
    }

    /// Invitee side: the inviter accepted our reuse on `connection_id`.
    pub async fn receive_reuse_accept(
        &self,
        accept: &HandshakeReuseAccept,
        connection_id: &str,
    ) -> OobResult<()> {
        let (invi_msg_id, reuse_msg_id) = accept.correlation().map_err(|e| {
            OobError::ReuseHandlingFailed {
                invitation_id: accept.thread.pthid.clone().unwrap_or_default(),
                message_id: accept.thread.thid.clone().unwrap_or_default(),
                reason: e.to_string(),
            }
        })?;

        let reject = self.notify(
            EventTopic::ConnectionReuseAccepted,
            ReuseNotice {
                thread_id: Some(reuse_msg_id.to_string()),
                connection_id: connection_id.to_string(),
                state: Some(ReuseOutcome::Rejected),
                comment: format!(
                    "Unable to process HandshakeReuseAccept message, connection {connection_id} and invitation {invi_msg_id}"
                ),
            },
        );

        notify_on_failure(
            self.apply_accept(invi_msg_id, reuse_msg_id, connection_id),
            reject,
        )
        .await
        .map_err(|e| OobError::ReuseHandlingFailed {
            invitation_id: invi_msg_id.to_string(),
            message_id: reuse_msg_id.to_string(),
            reason: e.to_string(),
        })
    }

    async fn apply_accept(
        &self,
        invi_msg_id: &str,
        reuse_msg_id: &str,
        connection_id: &str,
    ) -> OobResult<()> {
        let record = loop {
            let mut record = self
                .records
                .find_oob_by_reuse(invi_msg_id, reuse_msg_id)?
                .ok_or_else(|| {
                    OobError::RecordNotFound(format!(
                        "oob record for invitation {invi_msg_id} and reuse {reuse_msg_id}"
                    ))
                })?;

            match record.state {
                OobState::Accepted => {
                    debug!(oob_id = %record.oob_id, "Reuse already accepted");
                    return Ok(());
                }
                OobState::NotAccepted | OobState::Done => {
                    warn!(
                        oob_id = %record.oob_id,
                        state = %record.state,
                        "Ignoring late HandshakeReuseAccept"
                    );
                    return Ok(());
                }
                OobState::Initial | OobState::AwaitResponse => {}
            }
            if record.connection_id.is_none() {
                warn!(
                    oob_id = %record.oob_id,
                    "Ignoring HandshakeReuseAccept for an abandoned reuse"
                );
                return Ok(());
            }

            let mut connection = self.records.retrieve_connection(connection_id)?;
            let batch = WriteBatch::new().require_oob_unchanged(&record);
            let now = Utc::now();
            record.state = OobState::Accepted;
            record.updated_at = now;
            connection.invitation_msg_id = Some(invi_msg_id.to_string());
            connection.updated_at = now;
            match self
                .records
                .commit(batch.save_connection(connection).save_oob(record.clone()))
                .await
            {
                Ok(()) => break record,
                Err(OobError::StateConflict(reason)) => {
                    debug!(oob_id = %record.oob_id, %reason, "Accept raced another writer, re-checking");
                }
                Err(e) => return Err(e),
            }
        };

        let comment =
            format!("Connection {connection_id} is being reused for invitation {invi_msg_id}");
        info!(oob_id = %record.oob_id, reuse_msg_id, "{comment}");
        self.notify(
            EventTopic::ConnectionReuseAccepted,
            ReuseNotice {
                thread_id: Some(reuse_msg_id.to_string()),
                connection_id: connection_id.to_string(),
                state: Some(ReuseOutcome::Accepted),
                comment,
            },
        )
        .await;
        Ok(())
    }

    /// Either side: the other party rejected the reuse.
    pub async fn receive_problem_report(&self, report: &OobProblemReport) -> OobResult<()> {
        let (invi_msg_id, reuse_msg_id) =
            report
                .correlation()
                .map_err(|e| OobError::ReuseHandlingFailed {
                    invitation_id: report.thread.pthid.clone().unwrap_or_default(),
                    message_id: report.thread.thid.clone().unwrap_or_default(),
                    reason: e.to_string(),
                })?;
        let failed = |reason: String| OobError::ReuseHandlingFailed {
            invitation_id: invi_msg_id.to_string(),
            message_id: reuse_msg_id.to_string(),
            reason,
        };

        loop {
            let mut record = self
                .records
                .find_oob_by_reuse(invi_msg_id, reuse_msg_id)
                .map_err(|e| failed(e.to_string()))?
                .ok_or_else(|| failed("no matching oob record".to_string()))?;

            if record.state.is_terminal() || record.connection_id.is_none() {
                warn!(
                    oob_id = %record.oob_id,
                    state = %record.state,
                    "Ignoring problem report for settled exchange"
                );
                return Ok(());
            }

            info!(
                oob_id = %record.oob_id,
                code = ?report.description.code,
                explanation = %report.description.en,
                "Reuse not accepted"
            );
            record.state = OobState::NotAccepted;
            match self.records.save_oob_if_unchanged(&mut record).await {
                Ok(()) => return Ok(()),
                Err(OobError::StateConflict(_)) => continue,
                Err(e) => return Err(failed(e.to_string())),
            }
        }
    }
}
