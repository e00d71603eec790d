//! Channel transaction listener
//!
//! Owns a broker channel opened inside a unit of work and finishes it when
//! the unit of work does. The listener is the channel's single closer.

use std::time::Duration;

use async_trait::async_trait;

use crate::broker::{BrokerChannel, BrokerError};
use crate::unit_of_work::{HookError, RollbackCause, StagedEvents, UnitOfWork, UnitOfWorkListener};

use super::PublicationMode;

/// What happens to the channel when the unit of work commits
#[derive(Debug, Clone, Copy)]
enum Completion {
    /// Commit the broker transaction or wait for confirms, then close
    Finish {
        mode: PublicationMode,
        ack_timeout: Option<Duration>,
    },
    /// Publication already failed; only close
    CloseOnly,
}

pub(crate) struct ChannelTransactionListener<C> {
    channel: Option<C>,
    completion: Completion,
}

impl<C: BrokerChannel> ChannelTransactionListener<C> {
    pub(crate) fn new(channel: C, mode: PublicationMode, ack_timeout: Option<Duration>) -> Self {
        Self {
            channel: Some(channel),
            completion: Completion::Finish { mode, ack_timeout },
        }
    }

    pub(crate) fn close_only(channel: C) -> Self {
        Self {
            channel: Some(channel),
            completion: Completion::CloseOnly,
        }
    }
}

#[async_trait]
impl<C: BrokerChannel + 'static> UnitOfWorkListener for ChannelTransactionListener<C> {
    async fn on_prepare_commit(
        &mut self,
        _unit_of_work: &UnitOfWork,
        _staged: &[StagedEvents],
    ) -> Result<(), HookError> {
        match (&self.channel, self.completion) {
            (Some(channel), Completion::Finish { .. }) if !channel.is_open() => {
                Err(BrokerError::ChannelClosed.into())
            }
            _ => Ok(()),
        }
    }

    async fn after_commit(&mut self, _unit_of_work: &UnitOfWork) -> Result<(), HookError> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };

        let result = match self.completion {
            Completion::Finish { mode, ack_timeout } => {
                let result = complete_publication(&mut channel, mode, ack_timeout).await;
                if result.is_err() && mode == PublicationMode::Transactional {
                    try_rollback(&mut channel).await;
                }
                result
            }
            Completion::CloseOnly => Ok(()),
        };

        try_close(&mut channel).await;
        result.map_err(HookError::from)
    }

    async fn on_rollback(
        &mut self,
        _unit_of_work: &UnitOfWork,
        _cause: Option<RollbackCause<'_>>,
    ) -> Result<(), HookError> {
        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };

        if let Completion::Finish {
            mode: PublicationMode::Transactional,
            ..
        } = self.completion
        {
            try_rollback(&mut channel).await;
        }
        try_close(&mut channel).await;
        Ok(())
    }
}

/// Commit the broker transaction or wait for publisher confirms
pub(crate) async fn complete_publication<C: BrokerChannel>(
    channel: &mut C,
    mode: PublicationMode,
    ack_timeout: Option<Duration>,
) -> Result<(), BrokerError> {
    match mode {
        PublicationMode::Immediate => Ok(()),
        PublicationMode::Transactional => {
            channel.tx_commit().await?;
            tracing::info!("Broker transaction committed");
            Ok(())
        }
        PublicationMode::AckWait => channel.wait_for_confirms(ack_timeout).await,
    }
}

pub(crate) async fn try_rollback<C: BrokerChannel>(channel: &mut C) {
    if let Err(e) = channel.tx_rollback().await {
        tracing::debug!(error = %e, "Unable to roll back broker transaction");
    }
}

pub(crate) async fn try_close<C: BrokerChannel>(channel: &mut C) {
    if let Err(e) = channel.close().await {
        tracing::info!(error = %e, "Unable to close broker channel");
    }
}
