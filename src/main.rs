use anyhow::{Context as _, anyhow};
use clap::{Parser as _, Subcommand};
use dotenvy::dotenv;
use invite_ledger::config::{AppConfig, parse_duration};
use invite_ledger::db;
use invite_ledger::db::entities::guild_settings::RankAssignmentStyle;
use invite_ledger::modules::{invite_tracking, ranks};
use invite_ledger::services::clock::SystemClock;
use invite_ledger::services::discord::DiscordRest;
use invite_ledger::services::gateway::{Disconnected, GuildActions, InviteSource};
use invite_ledger::services::scheduler::ScheduledAction;
use invite_ledger::services::settings;
use invite_ledger::Data;
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rollback the specified number of migrations and run all migrations again.
    #[arg(long, num_args = 0..=1, default_missing_value = "1")]
    refresh_migrations: Option<u32>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Process gateway events (one JSON object per line on stdin) and run due scheduled actions.
    Run,
    /// Show a member's invite totals.
    Totals { guild: u64, member: u64 },
    /// Show the guild's top inviters.
    Leaderboard {
        guild: u64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// List a member's live invite codes, most used first.
    InviteCodes { guild: u64, member: u64 },
    RecomputeFakes { guild: u64 },
    RecomputeLeaves { guild: u64 },
    /// Add (or with a negative amount, remove) invites by hand.
    AddInvites {
        guild: u64,
        member: u64,
        creator: u64,
        #[arg(allow_negative_numbers = true)]
        amount: i128,
        reason: Option<String>,
    },
    /// Stop counting existing invites, for one member or the whole guild.
    ClearInvites {
        guild: u64,
        #[arg(long)]
        member: Option<u64>,
    },
    /// Show the guild's settings.
    Settings { guild: u64 },
    /// Change one guild setting.
    Set {
        guild: u64,
        #[arg(value_enum)]
        key: SettingKey,
        value: String,
    },
    AddRank {
        guild: u64,
        role: u64,
        invites: i64,
        description: Option<String>,
    },
    RemoveRank { guild: u64, role: u64 },
    Ranks { guild: u64 },
    /// Remove the muted role after the given delay (e.g. `1h30m`).
    ScheduleUnmute {
        guild: u64,
        member: u64,
        after: String,
        /// Defaults to the guild's `muted-role` setting.
        #[arg(long)]
        role: Option<u64>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Lift a ban after the given delay.
    ScheduleUnban {
        guild: u64,
        member: u64,
        after: String,
        #[arg(long)]
        reason: Option<String>,
    },
    CancelAction { id: i32 },
    FailedActions { guild: u64 },
    /// Show the number of active guilds and members.
    Counts,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SettingKey {
    SubtractFakes,
    SubtractLeaves,
    LeaveThreshold,
    FakeWindow,
    RankStyle,
    MutedRole,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_bool(raw: &str) -> anyhow::Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(anyhow!("expected on/off, got {raw:?}")),
    }
}

fn parse_seconds(raw: &str) -> anyhow::Result<u64> {
    parse_duration(raw)
        .map(|d| d.as_secs())
        .ok_or_else(|| anyhow!("invalid duration {raw:?}"))
}

fn due_in(after: &str) -> anyhow::Result<chrono::DateTime<chrono::Utc>> {
    let delay = parse_duration(after).ok_or_else(|| anyhow!("invalid duration {after:?}"))?;
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| chrono::Utc::now().checked_add_signed(delay))
        .ok_or_else(|| anyhow!("duration {after:?} is too far in the future"))
}

async fn set_setting(guild: u64, key: SettingKey, value: &str, data: &Data) -> anyhow::Result<()> {
    let updated = match key {
        SettingKey::SubtractFakes => {
            let on = parse_bool(value)?;
            settings::update_settings(guild, data, |s| s.auto_subtract_fakes = on).await?
        }
        SettingKey::SubtractLeaves => {
            let on = parse_bool(value)?;
            settings::update_settings(guild, data, |s| s.auto_subtract_leaves = on).await?
        }
        SettingKey::LeaveThreshold => {
            let secs = parse_seconds(value)?;
            settings::update_settings(guild, data, |s| s.auto_subtract_leave_threshold = secs).await?
        }
        SettingKey::FakeWindow => {
            let window = match value {
                "none" | "off" => None,
                raw => Some(parse_seconds(raw)?),
            };
            settings::update_settings(guild, data, |s| s.fake_rejoin_window = window).await?
        }
        SettingKey::RankStyle => {
            let style = match value {
                "all" => RankAssignmentStyle::All,
                "highest" => RankAssignmentStyle::Highest,
                other => return Err(anyhow!("unknown rank style {other:?}")),
            };
            settings::update_settings(guild, data, |s| s.rank_assignment_style = style).await?
        }
        SettingKey::MutedRole => {
            let role = match value {
                "none" => None,
                raw => Some(raw.parse::<u64>().context("muted role must be a role id")?),
            };
            settings::update_settings(guild, data, |s| s.muted_role = role).await?
        }
    };

    print_json(&updated)
}

/// Feeds stdin events to the tracker until stdin closes or the process is interrupted.
async fn run(data: Arc<Data>) -> anyhow::Result<()> {
    let runner = data
        .scheduler
        .clone()
        .start_runner(data.config.scheduler_poll_interval);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!("Ready, reading gateway events from stdin");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read event stream")? else {
                    info!("Event stream closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<invite_tracking::GatewayEvent>(&line) {
                    Ok(event) => invite_tracking::dispatch(&event, &data).await,
                    Err(e) => warn!("Skipping malformed event: {}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    runner.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;

    // Establish database connection
    let db = db::establish_connection(&config)
        .await
        .context("Failed to connect to database")?;

    // Run migrations
    if let Some(depth) = args.refresh_migrations {
        info!("Refreshing migrations (down {}, then up)...", depth);
        db::migrations::Migrator::down(&db, Some(depth))
            .await
            .context("Failed to rollback migration")?;
    }

    db::migrations::Migrator::up(&db, None)
        .await
        .context("Failed to run migrations")?;

    if args.refresh_migrations.is_some() {
        info!("Migrations refreshed successfully.");
        return Ok(());
    }

    let command = args.command.unwrap_or(Command::Run);

    let (invite_source, guild_actions): (Arc<dyn InviteSource>, Arc<dyn GuildActions>) =
        match &config.discord_token {
            Some(token) => {
                let rest = Arc::new(DiscordRest::new(token.clone(), config.store_timeout)?);
                (rest.clone() as Arc<dyn InviteSource>, rest as Arc<dyn GuildActions>)
            }
            None if matches!(command, Command::Run) => {
                return Err(anyhow!("DISCORD_TOKEN must be set to run"));
            }
            None => (
                Arc::new(Disconnected) as Arc<dyn InviteSource>,
                Arc::new(Disconnected) as Arc<dyn GuildActions>,
            ),
        };

    let data = Arc::new(Data::new(
        db,
        config,
        invite_source,
        guild_actions,
        Arc::new(SystemClock),
    ));

    match command {
        Command::Run => run(data).await?,
        Command::Totals { guild, member } => {
            print_json(&invite_tracking::get_totals(guild, member, &data).await?)?;
        }
        Command::Leaderboard { guild, limit } => {
            print_json(&invite_tracking::get_leaderboard(guild, Some(limit), &data).await?)?;
        }
        Command::InviteCodes { guild, member } => {
            print_json(&invite_tracking::list_member_codes(guild, member, &data).await?)?;
        }
        Command::RecomputeFakes { guild } => {
            print_json(&invite_tracking::recompute_fakes(guild, &data).await?)?;
        }
        Command::RecomputeLeaves { guild } => {
            print_json(&invite_tracking::recompute_leaves(guild, &data).await?)?;
        }
        Command::AddInvites {
            guild,
            member,
            creator,
            amount,
            reason,
        } => {
            let totals =
                invite_tracking::add_custom_invite(guild, member, Some(creator), amount, reason, &data)
                    .await?;
            print_json(&totals)?;
        }
        Command::ClearInvites { guild, member } => {
            print_json(&invite_tracking::clear_invites(guild, member, &data).await?)?;
        }
        Command::Settings { guild } => {
            print_json(&*settings::get_settings(guild, &data).await?)?;
        }
        Command::Set { guild, key, value } => set_setting(guild, key, &value, &data).await?,
        Command::AddRank {
            guild,
            role,
            invites,
            description,
        } => {
            print_json(&ranks::add_rank(guild, role, invites, description, &data).await?)?;
        }
        Command::RemoveRank { guild, role } => {
            ranks::remove_rank(guild, role, &data).await?;
            info!("Rank {} removed", role);
        }
        Command::Ranks { guild } => {
            print_json(&ranks::list_ranks(guild, &data).await?)?;
        }
        Command::ScheduleUnmute {
            guild,
            member,
            role,
            after,
            reason,
        } => {
            let action = ScheduledAction::Unmute {
                member_id: member,
                role_id: settings::resolve_muted_role(guild, role, &data).await?,
            };
            let row = data
                .scheduler
                .schedule_action(guild, action, due_in(&after)?, reason)
                .await?;
            print_json(&row)?;
        }
        Command::ScheduleUnban {
            guild,
            member,
            after,
            reason,
        } => {
            let action = ScheduledAction::Unban { member_id: member };
            let row = data
                .scheduler
                .schedule_action(guild, action, due_in(&after)?, reason)
                .await?;
            print_json(&row)?;
        }
        Command::CancelAction { id } => {
            data.scheduler.cancel_action(id).await?;
            info!("Scheduled action {} cancelled", id);
        }
        Command::FailedActions { guild } => {
            print_json(&data.scheduler.list_failed_actions(guild).await?)?;
        }
        Command::Counts => {
            print_json(&data.counts.get().await?)?;
        }
    }

    Ok(())
}
