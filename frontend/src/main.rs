use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::{Args, Parser, Subcommand};
use clinic_desk::domain::balance::BalanceOutcome;
use clinic_desk::domain::money::MoneyService;
use clinic_desk::hooks::use_approval_queue::{ApprovalQueue, ResolveOutcome};
use clinic_desk::hooks::use_attendance::{AttendanceController, SubmitOutcome};
use clinic_desk::hooks::use_attendance_history::AttendanceHistoryView;
use clinic_desk::hooks::use_ledger::LedgerBoard;
use clinic_desk::hooks::use_periodic_refresh::{PeriodicRefresh, PeriodicRefreshConfig};
use clinic_desk::services::{date_utils, logging};
use clinic_desk::{ApiClient, ClientConfig, ClinicApi};
use shared::{AttendanceStatus, PaymentMode, Role, Session};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "clinic-desk", version, about = "Attendance and ledger desk for a clinic branch")]
struct Cli {
    /// YAML config file (defaults to ./clinic-desk.yaml when present)
    #[arg(short, long, env = "CLINIC_DESK_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    session: SessionArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct SessionArgs {
    #[arg(long, global = true)]
    employee_id: Option<u64>,

    #[arg(long, global = true)]
    branch_id: Option<u64>,

    /// reception, admin or developer
    #[arg(long, global = true)]
    role: Option<Role>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the attendance roster for a day
    Roster {
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        status: Option<AttendanceStatus>,
        #[arg(long)]
        limit: Option<u32>,
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
    },
    /// Mark a patient present today
    Mark {
        patient_id: u64,
        /// Collect this payment when the balance is short
        #[arg(long)]
        pay: Option<String>,
        #[arg(long)]
        mode: Option<PaymentMode>,
        #[arg(long)]
        remarks: Option<String>,
        /// Ask an admin to approve instead of collecting payment
        #[arg(long, conflicts_with_all = ["pay", "mode"])]
        request_approval: bool,
    },
    /// Attendance history and calendar for one patient
    History {
        patient_id: u64,
        /// YYYY-MM
        #[arg(long, value_parser = parse_month)]
        month: Option<(i32, u32)>,
    },
    /// Branch ledger for a date range or a month
    Ledger {
        #[arg(long, value_parser = parse_date, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, value_parser = parse_date)]
        to: Option<NaiveDate>,
        /// YYYY-MM, ignored when --from/--to are given
        #[arg(long, value_parser = parse_month)]
        month: Option<(i32, u32)>,
        /// Expand these days
        #[arg(long, value_parser = parse_date)]
        expand: Vec<NaiveDate>,
    },
    /// Pending attendance approvals
    Pending {
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        watch: bool,
    },
    /// Approve a pending attendance request
    Approve { attendance_id: u64 },
    /// Reject a pending attendance request
    Reject {
        attendance_id: u64,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    date_utils::parse_date_string(value).ok_or_else(|| format!("'{}' is not a YYYY-MM-DD date", value))
}

fn parse_month(value: &str) -> Result<(i32, u32), String> {
    let date = date_utils::parse_date_string(&format!("{}-01", value.trim()))
        .ok_or_else(|| format!("'{}' is not a YYYY-MM month", value))?;
    Ok((date.year(), date.month()))
}

fn resolve_session(args: &SessionArgs, config: &ClientConfig) -> Result<Session> {
    let fallback = config.session.as_ref();
    let employee_id = args
        .employee_id
        .or(fallback.map(|s| s.employee_id))
        .ok_or_else(|| anyhow!("no employee id: pass --employee-id or set session.employee_id"))?;
    let branch_id = args
        .branch_id
        .or(fallback.map(|s| s.branch_id))
        .ok_or_else(|| anyhow!("no branch id: pass --branch-id or set session.branch_id"))?;
    let role = args
        .role
        .or(fallback.map(|s| s.role))
        .ok_or_else(|| anyhow!("no role: pass --role or set session.role"))?;

    Ok(Session {
        employee_id,
        branch_id,
        role,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ClientConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    logging::init(&config.log_level);

    let session = resolve_session(&cli.session, &config)?;
    let api: Arc<dyn ClinicApi> = Arc::new(ApiClient::new(&config).context("Failed to create API client")?);
    let money = MoneyService::with_rules(config.money_rules());

    tracing::info!(
        component = "main",
        api = %config.api_base_url,
        branch_id = session.branch_id,
        role = ?session.role,
        "clinic-desk starting"
    );

    match cli.command {
        Command::Roster {
            date,
            search,
            status,
            limit,
            watch,
        } => {
            let controller = Arc::new(AttendanceController::new(api, session, money.clone()));
            controller.set_filter(clinic_desk::hooks::use_attendance::RosterFilter { search, status, limit });
            let date = date.unwrap_or_else(date_utils::today);
            controller.refresh(date).await?;
            print_roster(&controller, &money);

            if watch {
                let poller = {
                    let controller = controller.clone();
                    let money = money.clone();
                    PeriodicRefresh::spawn(
                        "roster",
                        PeriodicRefreshConfig::every(config.attendance_poll_interval()),
                        move || {
                            let controller = controller.clone();
                            let money = money.clone();
                            async move {
                                controller.refresh(date).await?;
                                print_roster(&controller, &money);
                                Ok::<(), clinic_desk::ApiError>(())
                            }
                        },
                    )
                };
                tokio::signal::ctrl_c().await?;
                poller.stop().await;
            }
        }

        Command::Mark {
            patient_id,
            pay,
            mode,
            remarks,
            request_approval,
        } => {
            let controller = AttendanceController::new(api, session, money.clone());
            controller.refresh(date_utils::today()).await?;

            let outcome = controller.begin_marking(patient_id)?;
            let submitted = match outcome {
                BalanceOutcome::Sufficient => controller.confirm(patient_id, remarks.as_deref()).await?,
                BalanceOutcome::Insufficient { shortfall } if request_approval => {
                    println!("Balance short by {}, requesting admin approval", money.format_amount(shortfall));
                    controller.request_approval(patient_id, remarks.as_deref()).await?
                }
                BalanceOutcome::Insufficient { shortfall } if pay.is_some() || mode.is_some() => {
                    controller.open_payment_form(patient_id)?;
                    controller.edit_payment_form(patient_id, |form| {
                        if let Some(amount) = pay {
                            form.amount = amount;
                        }
                        form.mode = mode;
                        form.remarks = remarks.unwrap_or_default();
                    })?;
                    println!("Balance short by {}, collecting payment", money.format_amount(shortfall));
                    controller.collect_payment(patient_id).await?
                }
                BalanceOutcome::Insufficient { shortfall } => {
                    controller.cancel(patient_id)?;
                    bail!(
                        "balance is short by {} (suggested payment {}); pass --pay/--mode or --request-approval",
                        money.format_amount(shortfall),
                        money.format_amount(outcome.suggested_payment().unwrap_or(shortfall))
                    );
                }
            };

            if let SubmitOutcome::Submitted { refreshed } = submitted {
                if let Some(record) = controller.state().record(patient_id) {
                    println!(
                        "{} marked {} (balance {}, sessions {})",
                        record.patient_name,
                        record.status,
                        money.format_amount(record.effective_balance),
                        record.sessions_attended
                    );
                }
                if !refreshed {
                    println!("Attendance saved, but the roster could not be reloaded");
                }
            }
        }

        Command::History { patient_id, month } => {
            let view = AttendanceHistoryView::new(api);
            if let Some((year, month)) = month {
                view.show_month(year, month)?;
            }
            view.load(patient_id).await?;
            print_history(&view);
        }

        Command::Ledger {
            from,
            to,
            month,
            expand,
        } => {
            let board = LedgerBoard::new(api, session, money.clone());
            match (from, to, month) {
                (Some(from), Some(to), _) => board.load(from, to).await?,
                (_, _, Some((year, month))) => board.load_month(year, month).await?,
                _ => {
                    let today = date_utils::today();
                    board.load_month(today.year(), today.month()).await?
                }
            }
            for date in expand {
                board.toggle_day(date);
            }
            print_ledger(&board, &money);
        }

        Command::Pending { search, watch } => {
            let queue = Arc::new(ApprovalQueue::new(api, session, config.require_rejection_reason));
            queue.refresh(search.clone()).await?;
            print_pending(&queue, &money);

            if watch {
                let poller = {
                    let queue = queue.clone();
                    let money = money.clone();
                    PeriodicRefresh::spawn(
                        "approvals",
                        PeriodicRefreshConfig::every(config.approval_poll_interval()).staggered(Duration::from_secs(1)),
                        move || {
                            let queue = queue.clone();
                            let money = money.clone();
                            let search = search.clone();
                            async move {
                                queue.refresh(search).await?;
                                print_pending(&queue, &money);
                                Ok::<(), clinic_desk::ActionError>(())
                            }
                        },
                    )
                };
                tokio::signal::ctrl_c().await?;
                poller.stop().await;
            }
        }

        Command::Approve { attendance_id } => {
            let queue = ApprovalQueue::new(api, session, config.require_rejection_reason);
            queue.refresh(None).await?;
            report_resolution(attendance_id, queue.approve(attendance_id).await?);
        }

        Command::Reject { attendance_id, reason } => {
            let queue = ApprovalQueue::new(api, session, config.require_rejection_reason);
            queue.refresh(None).await?;
            report_resolution(attendance_id, queue.reject(attendance_id, reason.as_deref()).await?);
        }
    }

    Ok(())
}

fn print_roster(controller: &AttendanceController, money: &MoneyService) {
    let state = controller.state();
    let Some(date) = state.date else {
        return;
    };
    let marker = if date_utils::is_today(date) { " (today)" } else { "" };
    println!("{}{}", date_utils::format_date_for_display(date), marker);
    println!(
        "Active {}  Present {}  Pending {}  Absent {}",
        state.stats.total_active, state.stats.present, state.stats.pending, state.stats.absent
    );
    for record in &state.records {
        println!(
            "{:>6}  {:<28} {:<8} {:>12} / {:>10}  {}/{}",
            record.patient_id,
            record.patient_name,
            record.status,
            money.format_amount(record.effective_balance),
            money.format_amount(record.cost_per_day),
            record.sessions_attended,
            record
                .treatment_days
                .map(|d| d.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
}

fn print_history(view: &AttendanceHistoryView) {
    let state = view.state();
    let Some(summary) = state.summary.as_ref() else {
        return;
    };
    let total = summary
        .total_days
        .map(|d| d.to_string())
        .unwrap_or_else(|| "open-ended".to_string());
    println!(
        "Sessions {} of {}, remaining {}",
        summary.present_count, total, summary.remaining
    );
    if let Some(percent) = summary.progress_percent() {
        println!("Progress {}%", percent);
    }

    match view.calendar() {
        Some(Ok(calendar)) => {
            println!("\n{}", calendar.title);
            println!(" Su Mo Tu We Th Fr Sa");
            for week in calendar.cells.chunks(7) {
                let line: String = week
                    .iter()
                    .map(|cell| match cell.date {
                        Some(date) => format!("{:>2}{}", date.day(), status_glyph(cell.status)),
                        None => "   ".to_string(),
                    })
                    .collect();
                println!("{}", line);
            }
        }
        Some(Err(err)) => println!("{}", err),
        None => {}
    }

    let noted: Vec<_> = summary.entries().iter().filter(|e| e.remarks.is_some()).collect();
    if !noted.is_empty() {
        println!();
        for entry in noted {
            println!(
                "{}  {:<8} {}",
                date_utils::format_date_for_display(entry.date),
                entry.status,
                entry.remarks.as_deref().unwrap_or("")
            );
        }
    }
}

fn status_glyph(status: AttendanceStatus) -> char {
    match status {
        AttendanceStatus::Present => '*',
        AttendanceStatus::Pending => '?',
        AttendanceStatus::Rejected => 'x',
        AttendanceStatus::None => ' ',
    }
}

fn print_ledger(board: &LedgerBoard, money: &MoneyService) {
    let state = board.state();
    if let Some(kpis) = board.kpis() {
        println!(
            "Income {}  Expenses {}  Net {}  Opening {}  Current {}",
            kpis.total_income, kpis.total_expenses, kpis.net_profit_loss, kpis.opening_balance, kpis.current_balance
        );
    }
    for discrepancy in &state.discrepancies {
        println!("! {}", discrepancy);
    }

    for day in &state.days {
        let open = state.expanded.contains(&day.date);
        println!(
            "{} {}  open {}  +{}  -{}  close {}",
            if open { "v" } else { ">" },
            day.date,
            money.format_amount(day.opening_balance.total),
            money.format_amount(day.credits.total),
            money.format_amount(day.debits.total),
            money.format_amount(day.closing_balance.total),
        );
        if !open {
            continue;
        }
        if let Some(detail) = board.day_detail(day.date) {
            for row in detail.sheet {
                println!(
                    "    {:<7} {:>12} {:>12} {:>12} {:>12}",
                    row.column.to_string(),
                    money.format_amount(row.opening),
                    money.format_amount(row.credits),
                    money.format_amount(row.debits),
                    money.format_amount(row.closing),
                );
            }
            for tx in detail.transactions {
                let instrument = tx.instrument.map(|i| i.to_string()).unwrap_or_else(|| "-".to_string());
                println!("    {:<32} {:>14} {}", tx.description, money.format_signed(tx.signed_amount), instrument);
            }
        }
    }
}

fn print_pending(queue: &ApprovalQueue, money: &MoneyService) {
    let state = queue.state();
    println!("{} pending", state.items.len());
    for item in state.visible() {
        let cost = item
            .cost_per_day
            .map(|c| money.format_amount(c))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<28} {}  {}  {}",
            item.attendance_id,
            item.patient_name,
            item.attendance_date,
            cost,
            item.remarks.as_deref().unwrap_or("")
        );
    }
}

fn report_resolution(attendance_id: u64, outcome: ResolveOutcome) {
    match outcome {
        ResolveOutcome::Resolved(decision) => println!("Request {} {}", attendance_id, decision),
        ResolveOutcome::AlreadyResolved => println!("Request {} is no longer pending", attendance_id),
    }
}
