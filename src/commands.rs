//! Subcommands of the command-line front end.

use campus_sync::config::Config;
use campus_sync::model::{
  AttendanceEntry, AttendancePayload, ItemStatus, MutationKind, MutationPayload, PaymentPayload,
  QueuedMutation,
};
use campus_sync::{Gate, LocalStore, SyncDownReport, SyncService, SyncUpReport, WriteOutcome};
use chrono::NaiveDate;
use clap::Subcommand;
use color_eyre::Result;
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Record a fee payment (queued if offline)
  Pay {
    #[arg(long)]
    student: String,
    #[arg(long)]
    fee: String,
    #[arg(long)]
    amount: f64,
    #[arg(long, default_value = "cash")]
    method: String,
    #[arg(long)]
    remarks: Option<String>,
  },
  /// Record a day's attendance for a class section (queued if offline)
  Attend {
    #[arg(long)]
    date: NaiveDate,
    #[arg(long)]
    class: String,
    #[arg(long)]
    section: String,
    /// One entry per student: STUDENT_ID=STATUS[:REMARKS]
    #[arg(long = "mark", value_parser = parse_mark, required = true)]
    marks: Vec<AttendanceEntry>,
  },
  /// Upload queued payments and attendance
  SyncUp,
  /// Refresh cached students and fees
  SyncDown,
  /// Upload, then refresh
  Sync,
  /// Show queue counts and cache freshness
  Status,
  /// List queued mutations of one kind
  Pending {
    kind: MutationKind,
    /// Show failed items instead of pending ones
    #[arg(long)]
    failed: bool,
  },
  /// List cached students
  Students,
  /// List cached fees, optionally for one student
  Fees {
    #[arg(long)]
    student: Option<String>,
  },
  /// Return a failed mutation to the pending queue
  Requeue { key: String },
  /// Sync on a timer until interrupted
  Watch {
    /// Seconds between cycles (default from config)
    #[arg(long)]
    interval: Option<u64>,
  },
}

/// Everything a subcommand needs, built once in `main`.
pub struct App {
  pub store: Arc<LocalStore>,
  pub gate: Gate,
  pub sync: SyncService,
  pub config: Config,
}

impl App {
  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Pay {
        student,
        fee,
        amount,
        method,
        remarks,
      } => {
        let outcome = self
          .gate
          .submit_payment(PaymentPayload {
            student_id: student,
            fee_id: fee,
            amount_paid: amount,
            payment_method: method,
            remarks,
          })
          .await?;
        print_outcome(&outcome);
      }
      Command::Attend {
        date,
        class,
        section,
        marks,
      } => {
        let outcome = self
          .gate
          .submit_attendance(AttendancePayload {
            date,
            class_id: class,
            section_id: section,
            records: marks,
          })
          .await?;
        print_outcome(&outcome);
      }
      Command::SyncUp => print_up(&self.sync.sync_up().await?),
      Command::SyncDown => print_down(&self.sync.sync_down().await?),
      Command::Sync => {
        let (up, down) = self.sync.sync_all().await?;
        print_up(&up);
        print_down(&down);
      }
      Command::Status => self.print_status()?,
      Command::Pending { kind, failed } => {
        let status = if failed {
          ItemStatus::Failed
        } else {
          ItemStatus::Pending
        };
        for item in self.store.list_by_status(kind, status)? {
          println!("{}", describe(&item));
        }
      }
      Command::Students => {
        for student in self.store.students()? {
          println!(
            "{}\t{}\t{}",
            student.id,
            student.roll_number.as_deref().unwrap_or("-"),
            student.name
          );
        }
      }
      Command::Fees { student } => {
        let fees = match student {
          Some(id) => self.store.fees_for_student(&id)?,
          None => self.store.fees()?,
        };
        for fee in fees {
          println!(
            "{}\t{}\t{:.2}\t{}",
            fee.id,
            fee.student_id.as_deref().unwrap_or("-"),
            fee.amount,
            fee.status.as_deref().unwrap_or("-")
          );
        }
      }
      Command::Requeue { key } => {
        if self.store.requeue(&key)? {
          println!("{} re-queued", key);
        } else {
          println!("{} is already pending", key);
        }
      }
      Command::Watch { interval } => {
        let interval = interval
          .map(std::time::Duration::from_secs)
          .unwrap_or_else(|| self.config.sync.interval());
        println!("syncing every {:?}, Ctrl-C to stop", interval);

        let shutdown = async {
          let _ = tokio::signal::ctrl_c().await;
        };
        self.sync.run_periodic(interval, shutdown).await?;
      }
    }

    Ok(())
  }

  fn print_status(&self) -> Result<()> {
    let counts = self.store.pending_counts()?;
    for kind in MutationKind::ALL {
      println!(
        "{:<11} pending {:>4}   failed {:>4}",
        kind,
        counts.pending(kind),
        counts.failed(kind)
      );
    }

    match self.store.last_refreshed()? {
      Some(at) => println!(
        "reference cache refreshed {} ({} students, {} fees)",
        at.format("%Y-%m-%d %H:%M UTC"),
        self.store.students()?.len(),
        self.store.fees()?.len()
      ),
      None => println!("reference cache never refreshed"),
    }

    Ok(())
  }
}

/// Parse `STUDENT_ID=STATUS[:REMARKS]`.
fn parse_mark(s: &str) -> std::result::Result<AttendanceEntry, String> {
  let (student_id, rest) = s
    .split_once('=')
    .ok_or_else(|| format!("expected STUDENT_ID=STATUS[:REMARKS], got '{}'", s))?;
  let (status, remarks) = match rest.split_once(':') {
    Some((status, remarks)) => (status, Some(remarks.trim().to_string())),
    None => (rest, None),
  };

  let student_id = student_id.trim();
  if student_id.is_empty() {
    return Err(format!("missing student id in '{}'", s));
  }

  Ok(AttendanceEntry {
    student_id: student_id.to_string(),
    status: status.parse()?,
    remarks: remarks.filter(|r| !r.is_empty()),
  })
}

fn print_outcome(outcome: &WriteOutcome) {
  match outcome {
    WriteOutcome::Sent(m) => println!("sent {}", m.idempotency_key),
    WriteOutcome::Queued { mutation, reason } => {
      println!("queued {} ({:?})", mutation.idempotency_key, reason)
    }
  }
}

fn print_up(report: &SyncUpReport) {
  println!(
    "sync-up: {:?} synced={} rejected={} remaining={}{}",
    report.status,
    report.synced,
    report.rejected,
    report.remaining,
    detail_suffix(&report.detail)
  );
}

fn print_down(report: &SyncDownReport) {
  println!(
    "sync-down: {:?} students={} fees={}{}",
    report.status,
    report.students,
    report.fees,
    detail_suffix(&report.detail)
  );
}

fn detail_suffix(detail: &Option<String>) -> String {
  detail
    .as_ref()
    .map(|d| format!(" ({})", d))
    .unwrap_or_default()
}

fn describe(item: &QueuedMutation) -> String {
  let summary = match &item.payload {
    MutationPayload::Payment(p) => format!(
      "student {} fee {} amount {:.2} via {}",
      p.student_id, p.fee_id, p.amount_paid, p.payment_method
    ),
    MutationPayload::Attendance(a) => format!(
      "{} class {} section {} ({} students)",
      a.date,
      a.class_id,
      a.section_id,
      a.records.len()
    ),
  };

  let mut line = format!(
    "{}  {}  {}",
    item.idempotency_key,
    item.created_at_local.format("%Y-%m-%d %H:%M"),
    summary
  );
  if let Some(err) = &item.last_error {
    line.push_str(&format!("  [{}]", err));
  }
  line
}

#[cfg(test)]
mod tests {
  use super::*;
  use campus_sync::model::AttendanceMark;

  #[test]
  fn test_parse_mark_with_remarks() {
    let entry = parse_mark("s1=late: bus delayed").unwrap();
    assert_eq!(entry.student_id, "s1");
    assert_eq!(entry.status, AttendanceMark::Late);
    assert_eq!(entry.remarks.as_deref(), Some("bus delayed"));
  }

  #[test]
  fn test_parse_mark_short_status() {
    let entry = parse_mark("s2=A").unwrap();
    assert_eq!(entry.status, AttendanceMark::Absent);
    assert!(entry.remarks.is_none());
  }

  #[test]
  fn test_parse_mark_rejects_garbage() {
    assert!(parse_mark("s1").is_err());
    assert!(parse_mark("=present").is_err());
    assert!(parse_mark("s1=sleeping").is_err());
  }

  #[test]
  fn test_describe_failed_payment() {
    let mut item = QueuedMutation::with_key(
      "p1",
      MutationPayload::Payment(PaymentPayload {
        student_id: "s1".into(),
        fee_id: "f1".into(),
        amount_paid: 500.0,
        payment_method: "cash".into(),
        remarks: None,
      }),
    );
    item.last_error = Some("fee already settled".into());

    let line = describe(&item);
    assert!(line.starts_with("p1"));
    assert!(line.contains("amount 500.00 via cash"));
    assert!(line.ends_with("[fee already settled]"));
  }
}
