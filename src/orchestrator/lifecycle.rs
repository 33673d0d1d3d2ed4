//! Request lifecycle — the state machine edges.
//!
//! `initiate` validates, reserves quota, quotes, checks the ledger,
//! scores risk and either holds or processes. `process` routes to a
//! channel and issues the payout call. `complete`, `cancel`,
//! `resolve_hold` and `reverse` drive the remaining edges, and
//! `reconcile_once` is the polling pass that settles in-flight payouts
//! from the store instead of in-process timers.

use std::collections::HashMap;
use std::time::Instant;

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::channels::{PayoutOrder, RailStatus};
use crate::error::{CashoutError, Result};
use crate::orchestrator::{CashoutService, NewCashout};
use crate::types::{CashoutRequest, CashoutStatus};

impl CashoutService {
    /// Create and drive a new cashout. Returns the request in whatever
    /// state it reached: `on_hold` when risk gating triggered, otherwise
    /// `sent`/`failed` after the channel call.
    pub async fn initiate(&self, user_id: &str, new: NewCashout) -> Result<CashoutRequest> {
        let lock = self.user_lock(user_id).await;
        let guard = lock.lock().await;

        if new.amount <= Decimal::ZERO {
            return Err(CashoutError::Validation("amount must be positive".into()));
        }

        let now = self.clock.now();
        let mut profile = self.load_profile(user_id).await?;

        // Reserve quota first; every later failure on this path returns
        // before the reservation is persisted.
        self.quota.reserve(&mut profile, new.amount)?;

        let account = self
            .store
            .get_account(&new.account_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("account {}", new.account_id)))?;
        if account.user_id != user_id {
            return Err(CashoutError::Unauthorized);
        }
        if !account.is_usable() {
            return Err(CashoutError::Validation(
                "payout account is not active".into(),
            ));
        }
        if account.method != new.method {
            return Err(CashoutError::Validation(format!(
                "account {} is bound to {}, not {}",
                account.id, account.method, new.method
            )));
        }

        let quote = self
            .fees
            .quote(
                new.amount,
                &self.currency,
                new.method,
                new.speed_tier,
                &profile,
                now,
            )
            .ok_or_else(|| {
                CashoutError::Validation(format!(
                    "{} is not offered at {} speed",
                    new.method, new.speed_tier
                ))
            })?;
        if quote.net_amount <= Decimal::ZERO {
            return Err(CashoutError::Validation(
                "amount does not cover the fee".into(),
            ));
        }

        let available = self.ledger.available_balance(user_id).await?;
        if available < new.amount {
            return Err(CashoutError::InsufficientFunds {
                available,
                requested: new.amount,
            });
        }

        let mut request = CashoutRequest::from_quote(user_id, &account.id, &quote, now);
        request.risk = self
            .risk
            .assess(new.amount, new.method, new.speed_tier, &profile, now);

        // Commit the reservation, velocity bookkeeping, and any free
        // instant allowance the quote consumed.
        let window_start = now - self.velocity_window;
        profile.recent_initiations.retain(|t| *t > window_start);
        profile.recent_initiations.push(now);
        if quote.free_instant_used {
            profile.free_instant_remaining = profile.free_instant_remaining.saturating_sub(1);
        }
        self.store.put_profile(&profile).await?;
        self.store.put_request(&request).await?;

        info!(
            request = %request.id,
            user = user_id,
            amount = %request.amount,
            method = %request.method,
            speed = %request.speed_tier,
            fee = %request.fee.total,
            risk_score = request.risk.score,
            "Cashout initiated"
        );

        if request.risk.requires_manual_review {
            request.transition(
                CashoutStatus::OnHold,
                Some(format!(
                    "risk review required (score {})",
                    request.risk.score
                )),
                now,
            )?;
            self.store.put_request(&request).await?;
            return Ok(request);
        }

        request.transition(CashoutStatus::Processing, None, now)?;
        self.store.put_request(&request).await?;

        drop(guard);
        self.process(request).await
    }

    /// Route a `processing` request to a channel and issue the payout.
    pub async fn process(&self, request: CashoutRequest) -> Result<CashoutRequest> {
        let mut release_quota = false;
        let request = {
            let lock = self.request_lock(&request.id).await;
            let _guard = lock.lock().await;
            let now = self.clock.now();

            // Reload under the lock. A cancel may have landed between the
            // caller persisting `processing` and this task getting here;
            // its outcome stands and no payout is issued.
            let mut request = self
                .store
                .get_request(&request.id)
                .await?
                .ok_or_else(|| CashoutError::NotFound(format!("cashout {}", request.id)))?;
            if request.status != CashoutStatus::Processing {
                info!(
                    request = %request.id,
                    status = %request.status,
                    "Skipping payout, request is no longer processing"
                );
                // Taking the lock above may have re-minted a pruned entry.
                if request.status.is_terminal() && request.status != CashoutStatus::Completed {
                    self.drop_request_lock(&request.id).await;
                }
                return Ok(request);
            }

            match self.registry.select_channel(request.method).await {
                None => {
                    warn!(request = %request.id, method = %request.method, "No provider available");
                    request.transition(
                        CashoutStatus::Failed,
                        Some("no payout provider available".into()),
                        now,
                    )?;
                    self.store.put_request(&request).await?;
                    release_quota = true;
                }
                Some(adapter) => match self.store.get_account(&request.account_id).await? {
                    None => {
                        warn!(
                            request = %request.id,
                            account = %request.account_id,
                            "Payout account is gone"
                        );
                        request.transition(
                            CashoutStatus::Failed,
                            Some("payout account no longer exists".into()),
                            now,
                        )?;
                        self.store.put_request(&request).await?;
                        release_quota = true;
                    }
                    Some(account) => {
                        request.channel_id = Some(adapter.id().to_string());
                        let order = PayoutOrder {
                            // The request id is the idempotency key: a retried
                            // call after a timeout cannot double-pay.
                            idempotency_key: request.id.clone(),
                            amount: request.net_amount,
                            currency: request.currency.clone(),
                            destination: account.destination.clone(),
                            speed_tier: request.speed_tier,
                            metadata: HashMap::from([(
                                "user_id".to_string(),
                                request.user_id.clone(),
                            )]),
                        };

                        let started = Instant::now();
                        let outcome = tokio::time::timeout(
                            std::time::Duration::from_millis(self.channel_timeout_ms),
                            adapter.initiate_payout(&order),
                        )
                        .await;
                        let latency_ms = started.elapsed().as_millis() as u64;

                        match outcome {
                            Err(_elapsed) => {
                                // The rail may have accepted the payout; hold
                                // for reconciliation rather than guessing.
                                self.registry
                                    .record_outcome(adapter.id(), false, latency_ms)
                                    .await;
                                request.transition(
                                    CashoutStatus::OnHold,
                                    Some("channel timeout, awaiting reconciliation".into()),
                                    now,
                                )?;
                                self.store.put_request(&request).await?;
                            }
                            Ok(Err(e)) => {
                                self.registry
                                    .record_outcome(adapter.id(), false, latency_ms)
                                    .await;
                                warn!(request = %request.id, channel = adapter.id(), error = %e, "Payout failed");
                                request.transition(
                                    CashoutStatus::Failed,
                                    Some(format!("channel rejected payout: {e}")),
                                    now,
                                )?;
                                self.store.put_request(&request).await?;
                                release_quota = true;
                            }
                            Ok(Ok(receipt)) => {
                                self.registry
                                    .record_outcome(adapter.id(), true, latency_ms)
                                    .await;
                                request.channel_reference =
                                    Some(receipt.channel_reference.clone());
                                request.estimated_arrival = Some(receipt.estimated_arrival);
                                request.transition(CashoutStatus::Sent, None, now)?;
                                self.store.put_request(&request).await?;
                                info!(
                                    request = %request.id,
                                    channel = adapter.id(),
                                    reference = %receipt.channel_reference,
                                    eta = %receipt.estimated_arrival,
                                    "Payout sent"
                                );
                            }
                        }
                    }
                },
            }
            request
        };
        // Quota release happens after the request lock is dropped — the
        // lock order is always user before request.
        if release_quota {
            self.release_reservation(&request.user_id, request.amount)
                .await?;
        }
        if request.status.is_terminal() {
            self.drop_request_lock(&request.id).await;
        }
        Ok(request)
    }

    pub(crate) async fn release_reservation(&self, user_id: &str, amount: Decimal) -> Result<()> {
        let lock = self.user_lock(user_id).await;
        let _guard = lock.lock().await;
        let mut profile = self.load_profile(user_id).await?;
        self.quota.release(&mut profile, amount);
        self.store.put_profile(&profile).await?;
        Ok(())
    }

    /// Settle a `sent` request: debit the ledger exactly once, record
    /// arrival and processing time, update lifetime stats.
    pub async fn complete(&self, request_id: &str) -> Result<CashoutRequest> {
        let peek = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;

        let user_lock = self.user_lock(&peek.user_id).await;
        let _user_guard = user_lock.lock().await;
        let request_lock = self.request_lock(request_id).await;
        let _request_guard = request_lock.lock().await;

        // Reload under the lock; a racing cancel may have won.
        let mut request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;
        if request.status != CashoutStatus::Sent {
            return Err(CashoutError::InvalidTransition {
                from: request.status,
                to: CashoutStatus::Completed,
            });
        }

        let now = self.clock.now();
        self.ledger
            .debit(&request.user_id, request.amount, &request.id)
            .await?;

        request.transition(CashoutStatus::Completed, None, now)?;
        request.actual_arrival = Some(now);
        let processing_secs = (now - request.created_at).num_seconds();
        request.processing_secs = Some(processing_secs);
        self.store.put_request(&request).await?;

        let mut profile = self.load_profile(&request.user_id).await?;
        profile.lifetime_count += 1;
        profile.lifetime_volume += request.amount;
        let alpha = self.processing_ema_alpha;
        profile.avg_processing_secs = if profile.lifetime_count == 1 {
            processing_secs as f64
        } else {
            alpha * processing_secs as f64 + (1.0 - alpha) * profile.avg_processing_secs
        };
        self.store.put_profile(&profile).await?;

        if let Some(mut account) = self.store.get_account(&request.account_id).await? {
            account.total_count += 1;
            account.total_volume += request.amount;
            account.last_used_at = Some(now);
            self.store.put_account(&account).await?;
        }

        info!(
            request = %request.id,
            user = %request.user_id,
            processing_secs,
            "Cashout completed"
        );
        Ok(request)
    }

    /// User-initiated cancellation. Only `pending` and `processing`
    /// requests qualify; a cancel racing a completion is rejected
    /// deterministically under the per-request lock.
    pub async fn cancel(&self, request_id: &str, user_id: &str) -> Result<CashoutRequest> {
        let user_lock = self.user_lock(user_id).await;
        let _user_guard = user_lock.lock().await;
        let request_lock = self.request_lock(request_id).await;
        let _request_guard = request_lock.lock().await;

        let mut request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;
        if request.user_id != user_id {
            return Err(CashoutError::Unauthorized);
        }
        if !request.is_cancellable() {
            return Err(CashoutError::InvalidTransition {
                from: request.status,
                to: CashoutStatus::Cancelled,
            });
        }

        // A payout already issued to a rail must be recalled first; if
        // the rail refuses, the request's status stays unchanged.
        if let (Some(channel_id), Some(reference)) =
            (request.channel_id.clone(), request.channel_reference.clone())
        {
            let adapter = self
                .registry
                .adapter(&channel_id)
                .ok_or_else(|| CashoutError::NotFound(format!("channel {channel_id}")))?;
            adapter
                .cancel_payout(&reference)
                .await
                .map_err(|e| CashoutError::Channel {
                    retryable: e.retryable,
                    message: e.message,
                })?;
        }

        let now = self.clock.now();
        request.transition(
            CashoutStatus::Cancelled,
            Some("cancelled by user".into()),
            now,
        )?;
        self.store.put_request(&request).await?;

        // Refund the reserved usage; we already hold the user lock.
        let mut profile = self.load_profile(user_id).await?;
        self.quota.release(&mut profile, request.amount);
        self.store.put_profile(&profile).await?;

        info!(request = %request.id, user = user_id, "Cashout cancelled");
        drop(_request_guard);
        self.drop_request_lock(request_id).await;
        Ok(request)
    }

    /// External reviewer decision on an `on_hold` request.
    pub async fn resolve_hold(
        &self,
        request_id: &str,
        approve: bool,
        reason: Option<String>,
    ) -> Result<CashoutRequest> {
        let mut request = {
            let lock = self.request_lock(request_id).await;
            let _guard = lock.lock().await;

            let mut request = self
                .store
                .get_request(request_id)
                .await?
                .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;
            if request.status != CashoutStatus::OnHold {
                return Err(CashoutError::InvalidTransition {
                    from: request.status,
                    to: if approve {
                        CashoutStatus::Processing
                    } else {
                        CashoutStatus::Failed
                    },
                });
            }

            let now = self.clock.now();
            let to = if approve {
                CashoutStatus::Processing
            } else {
                CashoutStatus::Failed
            };
            let reason = reason.unwrap_or_else(|| {
                if approve {
                    "approved after review".into()
                } else {
                    "rejected after review".into()
                }
            });
            request.transition(to, Some(reason), now)?;
            self.store.put_request(&request).await?;
            request
        };

        if approve {
            request = self.process(request).await?;
        } else {
            self.release_reservation(&request.user_id, request.amount)
                .await?;
            self.drop_request_lock(request_id).await;
        }
        Ok(request)
    }

    /// External reversal of a completed payout (chargeback, recall).
    pub async fn reverse(&self, request_id: &str, reason: &str) -> Result<CashoutRequest> {
        let lock = self.request_lock(request_id).await;
        let _guard = lock.lock().await;

        let mut request = self
            .store
            .get_request(request_id)
            .await?
            .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;
        request.transition(
            CashoutStatus::Reversed,
            Some(reason.to_string()),
            self.clock.now(),
        )?;
        self.store.put_request(&request).await?;
        warn!(request = %request.id, reason, "Cashout reversed");
        drop(_guard);
        self.drop_request_lock(request_id).await;
        Ok(request)
    }

    /// One reconciliation pass over `sent` requests. Store-driven, so a
    /// process restart loses no pending settlements. Returns how many
    /// requests reached a new state.
    pub async fn reconcile_once(&self) -> Result<usize> {
        let now = self.clock.now();
        let sent = self
            .store
            .list_requests_by_status(CashoutStatus::Sent)
            .await?;

        let mut acted = 0;
        for request in sent {
            let due = request.estimated_arrival.map(|eta| now >= eta).unwrap_or(true);
            if !due {
                continue;
            }
            let (Some(channel_id), Some(reference)) =
                (request.channel_id.clone(), request.channel_reference.clone())
            else {
                continue;
            };
            let Some(adapter) = self.registry.adapter(&channel_id) else {
                warn!(request = %request.id, channel = %channel_id, "Unknown channel in reconcile");
                continue;
            };

            match adapter.check_status(&reference).await {
                Ok(report) => match report.status {
                    // A single stuck request stays `sent` and is retried
                    // next pass; it must not block the rest of the batch.
                    RailStatus::Settled => match self.complete(&request.id).await {
                        Ok(_) => acted += 1,
                        Err(e) => {
                            warn!(request = %request.id, error = %e, "Settlement failed");
                        }
                    },
                    RailStatus::Rejected => match self.fail_sent(&request.id, report.error).await {
                        Ok(()) => acted += 1,
                        Err(e) => {
                            warn!(request = %request.id, error = %e, "Rejection handling failed");
                        }
                    },
                    RailStatus::Accepted | RailStatus::InFlight => {}
                },
                Err(e) => {
                    // Leave it for the next pass.
                    warn!(request = %request.id, error = %e, "Status check failed");
                }
            }
        }
        Ok(acted)
    }

    /// A rail rejected a payout we believed was in flight.
    async fn fail_sent(&self, request_id: &str, error: Option<String>) -> Result<()> {
        let release = {
            let lock = self.request_lock(request_id).await;
            let _guard = lock.lock().await;
            let mut request = self
                .store
                .get_request(request_id)
                .await?
                .ok_or_else(|| CashoutError::NotFound(format!("cashout {request_id}")))?;
            if request.status != CashoutStatus::Sent {
                return Ok(());
            }
            request.transition(
                CashoutStatus::Failed,
                Some(error.unwrap_or_else(|| "rejected by channel".into())),
                self.clock.now(),
            )?;
            self.store.put_request(&request).await?;
            Some((request.user_id.clone(), request.amount))
        };
        if let Some((user_id, amount)) = release {
            self.release_reservation(&user_id, amount).await?;
            self.drop_request_lock(request_id).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
