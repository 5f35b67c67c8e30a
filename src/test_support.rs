//! In-process stand-in for the campus API, used by unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::api::{KindResult, RejectedItem, Transport, UploadBatch, UploadResults};
use crate::error::{Error, Result};
use crate::model::{
  CachedFee, CachedStudent, MutationKind, PaymentPayload, QueuedMutation, ReferenceSnapshot,
};

/// Server stub that applies each idempotency key at most once.
///
/// Repeated keys are acknowledged as already applied without a second effect.
#[derive(Default)]
pub struct StubTransport {
  effects: Mutex<HashMap<String, usize>>,
  deliveries: Mutex<HashMap<String, usize>>,
  reject: Mutex<HashMap<String, String>>,
  ignore: Mutex<HashSet<String>>,
  snapshot: Mutex<ReferenceSnapshot>,
  network_down: AtomicBool,
  auth_expired: AtomicBool,
  fail_fees: AtomicBool,
  fail_after_apply: AtomicBool,
  upload_calls: AtomicUsize,
  download_calls: AtomicUsize,
  submit_calls: AtomicUsize,
}

impl StubTransport {
  pub fn set_network_down(&self, down: bool) {
    self.network_down.store(down, Ordering::SeqCst);
  }

  pub fn set_auth_expired(&self, expired: bool) {
    self.auth_expired.store(expired, Ordering::SeqCst);
  }

  /// Make the download fail after the students part was produced.
  pub fn set_fail_fees(&self, fail: bool) {
    self.fail_fees.store(fail, Ordering::SeqCst);
  }

  /// Direct writes are applied server-side but the client sees a timeout.
  pub fn set_fail_after_apply(&self, fail: bool) {
    self.fail_after_apply.store(fail, Ordering::SeqCst);
  }

  pub fn reject(&self, key: &str, reason: &str) {
    self.reject.lock().unwrap().insert(key.into(), reason.into());
  }

  /// Leave a key unprocessed: absent from both result lists.
  pub fn ignore(&self, key: &str) {
    self.ignore.lock().unwrap().insert(key.into());
  }

  pub fn set_snapshot(&self, snapshot: ReferenceSnapshot) {
    *self.snapshot.lock().unwrap() = snapshot;
  }

  pub fn effects(&self, key: &str) -> usize {
    self.effects.lock().unwrap().get(key).copied().unwrap_or(0)
  }

  /// How many times the key reached the server, duplicates included.
  pub fn deliveries(&self, key: &str) -> usize {
    self.deliveries.lock().unwrap().get(key).copied().unwrap_or(0)
  }

  pub fn upload_calls(&self) -> usize {
    self.upload_calls.load(Ordering::SeqCst)
  }

  pub fn download_calls(&self) -> usize {
    self.download_calls.load(Ordering::SeqCst)
  }

  pub fn submit_calls(&self) -> usize {
    self.submit_calls.load(Ordering::SeqCst)
  }

  fn check_reachable(&self) -> Result<()> {
    if self.network_down.load(Ordering::SeqCst) {
      return Err(Error::Network("connection refused".into()));
    }
    if self.auth_expired.load(Ordering::SeqCst) {
      return Err(Error::Auth("token expired".into()));
    }
    Ok(())
  }

  fn apply(&self, key: &str) {
    *self.deliveries.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
    self.effects.lock().unwrap().entry(key.to_string()).or_insert(1);
  }

  fn process(&self, items: &[QueuedMutation]) -> KindResult {
    let reject = self.reject.lock().unwrap().clone();
    let ignore = self.ignore.lock().unwrap().clone();
    let mut result = KindResult::default();

    for item in items {
      let key = &item.idempotency_key;
      if let Some(reason) = reject.get(key) {
        result.failed.push(RejectedItem {
          idempotency_key: key.clone(),
          reason: Some(reason.clone()),
        });
      } else if !ignore.contains(key) {
        self.apply(key);
        result.success.push(key.clone());
      }
    }

    result
  }
}

#[async_trait]
impl Transport for StubTransport {
  async fn upload(&self, batch: &UploadBatch) -> Result<UploadResults> {
    self.upload_calls.fetch_add(1, Ordering::SeqCst);
    self.check_reachable()?;

    Ok(UploadResults {
      payments: self.process(batch.items(MutationKind::Payments)),
      attendance: self.process(batch.items(MutationKind::Attendance)),
    })
  }

  async fn download(&self) -> Result<ReferenceSnapshot> {
    self.download_calls.fetch_add(1, Ordering::SeqCst);
    self.check_reachable()?;

    let snapshot = self.snapshot.lock().unwrap().clone();
    // Students arrived; the fees half never does
    if self.fail_fees.load(Ordering::SeqCst) {
      return Err(Error::Network("fees fetch timed out".into()));
    }

    Ok(snapshot)
  }

  async fn submit(&self, mutation: &QueuedMutation) -> Result<()> {
    self.submit_calls.fetch_add(1, Ordering::SeqCst);
    self.check_reachable()?;

    self.apply(&mutation.idempotency_key);
    if self.fail_after_apply.load(Ordering::SeqCst) {
      return Err(Error::Network("request timed out".into()));
    }
    Ok(())
  }
}

pub fn payment_payload(amount: f64) -> PaymentPayload {
  PaymentPayload {
    student_id: "s1".into(),
    fee_id: "f1".into(),
    amount_paid: amount,
    payment_method: "cash".into(),
    remarks: None,
  }
}

pub fn student(id: &str, name: &str) -> CachedStudent {
  CachedStudent {
    id: id.into(),
    name: name.into(),
    roll_number: None,
    class_id: None,
    section_id: None,
    extra: Default::default(),
  }
}

pub fn fee(id: &str, student_id: &str, amount: f64) -> CachedFee {
  CachedFee {
    id: id.into(),
    student_id: Some(student_id.into()),
    amount,
    due_date: None,
    status: None,
    extra: Default::default(),
  }
}
