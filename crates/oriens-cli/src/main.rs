//! Oriens CLI - the Oriens ledger, preferences and project objectives from a terminal.
//!
//! Every command builds a `UserContext` for the saved session, paints the
//! cached data, runs the requested reads or writes to completion and prints
//! the outcome along with any notices.

use std::io;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use oriens_core::filter::PeriodKind;
use oriens_core::models::{LedgerRecord, ObjectiveStatus, Recurrence, RecurrencePattern, Theme};
use oriens_core::summary::MonthCursor;
use oriens_core::sync::{Notice, SyncError, ThemeApplier};
use oriens_core::utils::{format_amount, truncate};
use oriens_core::{Config, Session, UserContext};

// ============================================================================
// Constants
// ============================================================================

/// Log file prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "oriens.log";

/// Width of the description column in entry listings
const DESCRIPTION_WIDTH: usize = 32;

const USAGE: &str = "\
Usage: oriens <command> [options]

Commands:
  list [--period all|7d|15d|30d|this-month] [--from DATE --to DATE]
       [--tag ID] [--search TEXT] [--page N]
  charts [--month YYYY-MM]
  add <amount> <tag id> [--date DATE] [--description TEXT]
      [--repeat daily|weekly|monthly|yearly [--until DATE]]
  delete <entry id>
  tags
  recurring
  prefs [notifications on|off] [sound on|off] [theme light|dark|toggle]
  objectives <project id> [add TITLE | toggle ID | remove ID]

Session: set ORIENS_TOKEN and ORIENS_USER_ID, or log in with the Oriens app.";

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

/// Prints theme switches; a terminal has nothing else to repaint.
struct TerminalTheme;

impl ThemeApplier for TerminalTheme {
    fn apply_theme(&mut self, theme: Theme) {
        info!(theme = %theme, "Theme applied");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    let cache_dir = config.cache_dir()?;
    let _guard = init_tracing(Some(&cache_dir));
    info!("Oriens CLI starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "-h" | "--help" | "help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut session = Session::new(cache_dir);
    session.load()?;
    let session_data = session
        .data
        .clone()
        .ok_or_else(|| anyhow!("No saved session. Set ORIENS_TOKEN and ORIENS_USER_ID first."))?;
    session.save()?;

    let mut ctx = UserContext::connect(&config, &session_data, Box::new(TerminalTheme))?;
    let rest = &args[1..];
    let result = match command {
        "list" => list(&mut ctx, rest).await,
        "charts" => charts(&mut ctx, rest).await,
        "add" => add(&mut ctx, rest).await,
        "delete" => delete(&mut ctx, rest).await,
        "tags" => tags(&mut ctx).await,
        "recurring" => recurring(&mut ctx).await,
        "prefs" => prefs(&mut ctx, rest).await,
        "objectives" => objectives(&mut ctx, rest).await,
        other => Err(anyhow!("Unknown command '{}'\n\n{}", other, USAGE)),
    };

    let reauth = print_notices(&mut ctx);
    ctx.close();
    if reauth {
        session.clear()?;
        eprintln!("Session expired. Log in again and set a fresh ORIENS_TOKEN.");
    }
    info!("Oriens CLI done");
    result
}

/// Prints pending notices. Returns true when one of them asks for a new login.
fn print_notices(ctx: &mut UserContext) -> bool {
    let mut reauth = false;
    for notice in ctx.drain_notices() {
        match notice {
            Notice::Error { title, detail } => eprintln!("! {}: {}", title, detail),
            Notice::Success { title, detail } => eprintln!("{}: {}", title, detail),
            Notice::ReauthRequired => reauth = true,
        }
    }
    reauth
}

// ============================================================================
// Argument helpers
// ============================================================================

/// Value following `--name`, if present.
fn option<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn parse_option<T: FromStr>(args: &[String], name: &str) -> Result<Option<T>> {
    option(args, name)
        .map(|v| v.parse::<T>().map_err(|_| anyhow!("Invalid value for {}: {}", name, v)))
        .transpose()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))
}

fn parse_month(s: &str) -> Result<MonthCursor> {
    let first = NaiveDate::parse_from_str(&format!("{}-01", s), "%Y-%m-%d")
        .with_context(|| format!("Invalid month '{}', expected YYYY-MM", s))?;
    Ok(MonthCursor::of(first))
}

fn on_off(s: &str) -> Result<bool> {
    match s {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        other => bail!("Expected on or off, got '{}'", other),
    }
}

fn print_entry(record: &LedgerRecord, ctx: &UserContext) {
    let tag = ctx
        .ledger
        .tag(record.tag_id)
        .map(|t| t.name.as_str())
        .unwrap_or("?");
    let id = record.id.map(|id| id.to_string()).unwrap_or_else(|| "new".to_string());
    println!(
        "{:>6}  {}  {:>14}  {:<16}  {}",
        id,
        record.date,
        format_amount(record.amount),
        truncate(tag, 16),
        truncate(record.description.as_deref().unwrap_or(""), DESCRIPTION_WIDTH),
    );
}

// ============================================================================
// Commands
// ============================================================================

async fn list(ctx: &mut UserContext, args: &[String]) -> Result<()> {
    let period = match option(args, "--period") {
        Some(p) => PeriodKind::parse(p).ok_or_else(|| anyhow!("Unknown period '{}'", p))?,
        None => PeriodKind::All,
    };
    let from = option(args, "--from").map(parse_date).transpose()?;
    let to = option(args, "--to").map(parse_date).transpose()?;
    let tag = parse_option::<i64>(args, "--tag")?;
    let search = option(args, "--search").unwrap_or("");
    let page = parse_option::<u32>(args, "--page")?.unwrap_or(1).max(1) - 1;

    ctx.open();
    ctx.ledger.update_filters(|f| {
        match (from, to) {
            (Some(start), Some(end)) => {
                f.set_custom_range(start, end);
            }
            _ => {
                f.set_period(period);
            }
        }
        f.set_tag(tag);
        f.set_search(search);
        f.set_page(page);
        f.is_ready()
    });
    if !ctx.ledger.filters().is_ready() {
        return Err(SyncError::IncompleteFilters)
            .context("A custom period needs both --from and --to");
    }
    ctx.run_until_idle().await;

    let table = ctx.ledger.table();
    for record in &table.items {
        print_entry(record, ctx);
    }
    println!(
        "Page {} of {} ({} entries)",
        table.page_index + 1,
        table.total_pages.max(1),
        table.total_elements
    );
    Ok(())
}

async fn charts(ctx: &mut UserContext, args: &[String]) -> Result<()> {
    ctx.open();
    ctx.run_until_idle().await;

    let month = match option(args, "--month") {
        Some(m) => parse_month(m)?,
        None => MonthCursor::today(ctx.ledger.today()),
    };

    let chart = ctx.ledger.chart();
    println!("Expenses by tag");
    for column in &chart.months {
        let parts: Vec<String> = chart
            .tags
            .iter()
            .filter_map(|t| {
                let id = t.id?;
                let total = chart.total(column.month, id);
                (!total.is_zero()).then(|| format!("{} {}", t.name, format_amount(total)))
            })
            .collect();
        println!("  {}  {}", column.month.label(), parts.join(", "));
    }

    let overview = ctx.ledger.overview(month);
    println!();
    println!("{}", month.label());
    println!("  Revenue   {:>14}", format_amount(overview.revenue));
    println!("  Expenses  {:>14}", format_amount(overview.expenses));
    println!("  Balance   {:>14}", format_amount(overview.balance));

    let distribution = ctx.ledger.distribution(month);
    for slice in &distribution.slices {
        println!(
            "  {:<16} {:>14}  {:>6}%",
            truncate(&slice.label, 16),
            format_amount(slice.amount),
            slice.share
        );
    }
    Ok(())
}

async fn add(ctx: &mut UserContext, args: &[String]) -> Result<()> {
    let amount = args
        .first()
        .ok_or_else(|| anyhow!("Missing amount"))
        .and_then(|a| Decimal::from_str(a).with_context(|| format!("Invalid amount '{}'", a)))?;
    let tag_id: i64 = args
        .get(1)
        .ok_or_else(|| anyhow!("Missing tag id"))?
        .parse()
        .context("Invalid tag id")?;
    let date = match option(args, "--date") {
        Some(d) => parse_date(d)?,
        None => ctx.ledger.today(),
    };

    let mut record = LedgerRecord::new(amount, date, tag_id);
    if let Some(description) = option(args, "--description") {
        record = record.with_description(description);
    }
    if let Some(repeat) = option(args, "--repeat") {
        let pattern = RecurrencePattern::parse(repeat)
            .ok_or_else(|| anyhow!("Unknown repeat pattern '{}'", repeat))?;
        let end_date = option(args, "--until").map(parse_date).transpose()?;
        record = record.with_recurrence(Recurrence { pattern, end_date });
    } else if option(args, "--until").is_some() {
        bail!("--until needs --repeat");
    }

    ctx.open();
    ctx.run_until_idle().await;
    ctx.ledger.create_entry(record)?;
    ctx.run_until_idle().await;

    if let Some(first) = ctx.ledger.table().items.first() {
        print_entry(first, ctx);
    }
    Ok(())
}

async fn delete(ctx: &mut UserContext, args: &[String]) -> Result<()> {
    let id: i64 = args
        .first()
        .ok_or_else(|| anyhow!("Missing entry id"))?
        .parse()
        .context("Invalid entry id")?;
    ctx.open();
    ctx.run_until_idle().await;
    ctx.ledger.delete_entry(id)?;
    ctx.run_until_idle().await;
    Ok(())
}

async fn tags(ctx: &mut UserContext) -> Result<()> {
    if let Some(age) = ctx.store().tags_age() {
        info!(age = %age, "Cached tags found");
    }
    ctx.open();
    ctx.run_until_idle().await;
    for tag in ctx.ledger.tags() {
        let id = tag.id.map(|id| id.to_string()).unwrap_or_default();
        let kind = if tag.allow_negative { "expenses ok" } else { "revenue only" };
        println!("{:>6}  {}  {:<24}  {}", id, tag.color, truncate(&tag.name, 24), kind);
    }
    Ok(())
}

async fn recurring(ctx: &mut UserContext) -> Result<()> {
    ctx.open();
    ctx.run_until_idle().await;
    let total = ctx.ledger.entry_count().await?;
    let entries = ctx.ledger.recurring_entries().await?;
    for record in &entries {
        print_entry(record, ctx);
    }
    println!("{} recurring of {} entries", entries.len(), total);
    Ok(())
}

async fn prefs(ctx: &mut UserContext, args: &[String]) -> Result<()> {
    ctx.open();
    ctx.run_until_idle().await;

    for pair in args.chunks(2) {
        let [name, value] = pair else {
            bail!("Missing value for '{}'", pair[0]);
        };
        match name.as_str() {
            "notifications" => {
                ctx.preferences.set_notifications(on_off(value)?);
            }
            "sound" => {
                ctx.preferences.set_sound(on_off(value)?);
            }
            "theme" if value == "toggle" => {
                ctx.preferences.toggle_theme();
            }
            "theme" => {
                let theme =
                    Theme::parse(value).ok_or_else(|| anyhow!("Unknown theme '{}'", value))?;
                ctx.preferences.set_theme(theme);
            }
            other => bail!("Unknown preference '{}'", other),
        }
    }
    ctx.run_until_idle().await;

    let current = ctx.preferences.current().unwrap_or_default();
    println!("notifications  {}", if current.notifications { "on" } else { "off" });
    println!("sound          {}", if current.sound { "on" } else { "off" });
    println!("theme          {}", current.theme);
    Ok(())
}

async fn objectives(ctx: &mut UserContext, args: &[String]) -> Result<()> {
    let project: i64 = args
        .first()
        .ok_or_else(|| anyhow!("Missing project id"))?
        .parse()
        .context("Invalid project id")?;
    ctx.objectives.load(project).await?;

    // Objectives are picked by id prefix, as shown in the listing
    let find = |ctx: &UserContext, prefix: &str| {
        ctx.objectives
            .objectives()
            .iter()
            .find(|o| o.id.to_string().starts_with(prefix))
            .map(|o| o.id)
            .ok_or_else(|| anyhow!("No objective matches '{}'", prefix))
    };

    match (args.get(1).map(String::as_str), args.get(2)) {
        (Some("add"), Some(title)) => {
            ctx.objectives.add(title, None)?;
        }
        (Some("toggle"), Some(prefix)) => {
            let id = find(ctx, prefix)?;
            ctx.objectives.toggle(id);
        }
        (Some("remove"), Some(prefix)) => {
            let id = find(ctx, prefix)?;
            ctx.objectives.remove(id);
        }
        (None, _) => {}
        (Some(action), _) => bail!("Unknown or incomplete objectives action '{}'", action),
    }
    ctx.objectives.run_until_idle().await;

    if let Some(p) = ctx.objectives.project() {
        println!("{} ({}% done)", p.title, ctx.objectives.progress());
    }
    for objective in ctx.objectives.objectives() {
        let mark = match objective.status {
            ObjectiveStatus::Concluded => "x",
            ObjectiveStatus::Pending => " ",
        };
        let id = objective.id.to_string();
        let due = objective.due_date.map(|d| d.to_string()).unwrap_or_default();
        println!("[{}] {}  {}  {}", mark, &id[..8], objective.title, due);
    }
    println!(
        "{} pending, {} concluded",
        ctx.objectives.pending_count(),
        ctx.objectives.concluded_count()
    );
    Ok(())
}
