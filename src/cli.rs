//! Command-line interface: engine config checks and the credit API client.

use std::error::Error;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use colored::*;

use crate::api::{
    CreateRedemptionCodes, CreditClient, CreditLog, ModelPrices, RedemptionCode,
    UpdateRedemptionCode,
};
use crate::config::AugmentConfig;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api/v1";

#[derive(Parser, Debug)]
#[command(name = "chat-augment")]
#[command(version)]
#[command(about = "Chat UI augmentation toolkit: engine config checks and credit administration")]
pub struct Args {
    /// API root including the version prefix
    #[arg(long, global = true, env = "CHAT_AUGMENT_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Bearer token for the credit API
    #[arg(long, global = true, env = "CHAT_AUGMENT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Print raw JSON instead of formatted output
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Engine configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Credit balance, logs, payments, prices and statistics
    Credit {
        #[command(subcommand)]
        action: CreditCommand,
    },
    /// Redemption codes
    Codes {
        #[command(subcommand)]
        action: CodesCommand,
    },
    /// Print a shell completion script
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Parse and validate a TOML config file
    Check { path: PathBuf },
    /// Print the default configuration as TOML
    Default,
}

#[derive(Subcommand, Debug)]
pub enum CreditCommand {
    /// Show exchange ratio and payment priority
    Config,
    /// Your own credit history
    Logs {
        #[arg(long)]
        page: Option<u32>,
    },
    /// Every user's credit history (admin)
    AllLogs {
        /// Filter by user name or email
        #[arg(long)]
        query: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Delete log rows created before a unix timestamp (admin)
    DeleteLogs {
        #[arg(long)]
        before: i64,
    },
    /// Open a payment ticket
    Ticket {
        #[arg(long)]
        pay_type: String,
        #[arg(long)]
        amount: f64,
    },
    /// Show model prices (admin)
    Prices,
    /// Replace model prices from a JSON file (admin)
    SetPrices { file: PathBuf },
    /// Usage statistics between two unix timestamps (admin)
    Stats {
        #[arg(long)]
        start: i64,
        #[arg(long)]
        end: i64,
    },
}

#[derive(Subcommand, Debug)]
pub enum CodesCommand {
    List {
        #[arg(long)]
        keyword: Option<String>,
        #[arg(long)]
        page: Option<u32>,
        #[arg(long)]
        limit: Option<u32>,
    },
    Create {
        #[arg(long)]
        purpose: String,
        #[arg(long, default_value = "1")]
        count: u32,
        #[arg(long)]
        amount: f64,
        /// Expiry as a unix timestamp
        #[arg(long)]
        expires_at: Option<i64>,
    },
    Update {
        code: String,
        #[arg(long)]
        purpose: Option<String>,
        #[arg(long)]
        amount: Option<f64>,
        #[arg(long)]
        expires_at: Option<i64>,
    },
    Delete {
        code: String,
    },
    /// Export matching codes as CSV
    Export {
        #[arg(long)]
        keyword: String,
        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Redeem a code for the current user
    Receive {
        code: String,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    match &args.command {
        Command::Config { action } => run_config(action),
        Command::Completions { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "chat-augment", &mut std::io::stdout());
            Ok(())
        }
        Command::Credit { action } => run_credit(&client(&args)?, action, args.json).await,
        Command::Codes { action } => run_codes(&client(&args)?, action, args.json).await,
    }
}

fn client(args: &Args) -> Result<CreditClient, Box<dyn Error>> {
    let token = args
        .token
        .clone()
        .ok_or("no API token: pass --token or set CHAT_AUGMENT_TOKEN")?;
    Ok(CreditClient::builder(&args.base_url).token(token).build()?)
}

fn run_config(action: &ConfigCommand) -> Result<(), Box<dyn Error>> {
    match action {
        ConfigCommand::Check { path } => {
            let cfg = AugmentConfig::load(path)?;
            println!("{} {}", "ok".green().bold(), path.display());
            println!(
                "  suppressed route: {}  threshold: {}px  languages: {}",
                cfg.route.suppressed_fragment.cyan(),
                cfg.code_blocks.collapse_threshold_px,
                cfg.scripts.languages.len()
            );
        }
        ConfigCommand::Default => print!("{}", AugmentConfig::default().to_toml_string()?),
    }
    Ok(())
}

async fn run_credit(
    client: &CreditClient,
    action: &CreditCommand,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    match action {
        CreditCommand::Config => {
            let cfg = client.get_config().await?;
            if json {
                return print_json(&cfg);
            }
            println!("exchange ratio: {}", cfg.exchange_ratio.to_string().cyan());
            println!("pay priority:   {}", cfg.pay_priority);
        }
        CreditCommand::Logs { page } => {
            let logs = client.list_credit_logs(*page).await?;
            if json {
                return print_json(&logs);
            }
            for log in &logs {
                println!("{}", format_log(log));
            }
        }
        CreditCommand::AllLogs { query, page, limit } => {
            let page = client.list_all_logs(query.as_deref(), *page, *limit).await?;
            if json {
                return print_json(&page);
            }
            println!("{} rows total", page.total.to_string().bold());
            for log in &page.results {
                println!("{}", format_log(log));
            }
        }
        CreditCommand::DeleteLogs { before } => {
            let resp = client.delete_logs(*before).await?;
            println!("{} {} rows deleted", "ok".green().bold(), resp.affect_rows);
        }
        CreditCommand::Ticket { pay_type, amount } => {
            let ticket = client.create_trade_ticket(pay_type, *amount).await?;
            if json {
                return print_json(&ticket);
            }
            println!("{} ticket {} for {}", "ok".green().bold(), ticket.id, ticket.amount);
            println!("{}", serde_json::to_string_pretty(&ticket.detail)?);
        }
        CreditCommand::Prices => print_json(&client.get_model_prices().await?)?,
        CreditCommand::SetPrices { file } => {
            let text = std::fs::read_to_string(file)?;
            let prices: ModelPrices = serde_json::from_str(&text)?;
            let message = client.update_model_prices(&prices).await?;
            println!("{} {message}", "ok".green().bold());
        }
        CreditCommand::Stats { start, end } => {
            print_json(&client.get_statistics(*start, *end).await?)?;
        }
    }
    Ok(())
}

async fn run_codes(
    client: &CreditClient,
    action: &CodesCommand,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    match action {
        CodesCommand::List { keyword, page, limit } => {
            let page = client
                .list_redemption_codes(keyword.as_deref(), *page, *limit)
                .await?;
            if json {
                return print_json(&page);
            }
            println!("{} codes total", page.total.to_string().bold());
            for code in &page.results {
                println!("{}", format_code(code));
            }
        }
        CodesCommand::Create {
            purpose,
            count,
            amount,
            expires_at,
        } => {
            let form = CreateRedemptionCodes {
                purpose: purpose.clone(),
                count: *count,
                amount: *amount,
                expired_at: *expires_at,
            };
            let created = client.create_redemption_codes(&form).await?;
            println!("{} {} codes created", "ok".green().bold(), created.total);
        }
        CodesCommand::Update {
            code,
            purpose,
            amount,
            expires_at,
        } => {
            let form = UpdateRedemptionCode {
                purpose: purpose.clone(),
                amount: *amount,
                expired_at: *expires_at,
            };
            client.update_redemption_code(code, &form).await?;
            println!("{} {code} updated", "ok".green().bold());
        }
        CodesCommand::Delete { code } => {
            client.delete_redemption_code(code).await?;
            println!("{} {code} deleted", "ok".green().bold());
        }
        CodesCommand::Export { keyword, output } => {
            let csv = client.export_redemption_codes(keyword).await?;
            match output {
                Some(path) => {
                    std::fs::write(path, &csv)?;
                    let rows = csv.lines().count().saturating_sub(1);
                    println!("{} {rows} codes written to {}", "ok".green().bold(), path.display());
                }
                None => print!("{csv}"),
            }
        }
        CodesCommand::Receive { code } => {
            client.receive_redemption_code(code).await?;
            println!("{} {code} redeemed", "ok".green().bold());
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One log row: time, signed credit change, model and description.
pub fn format_log(log: &CreditLog) -> String {
    let credit = format!("{:+.4}", log.credit);
    let credit = if log.credit < 0.0 { credit.red() } else { credit.green() };
    let model = log
        .detail
        .api_params
        .model
        .name
        .as_deref()
        .or(log.detail.api_params.model.id.as_deref())
        .unwrap_or("-");
    let user = log
        .username
        .as_deref()
        .filter(|u| !u.is_empty())
        .map(|u| format!(" [{u}]"))
        .unwrap_or_default();
    format!("{:>10}  {credit}  {model}{user}  {}", log.created_at, log.detail.desc)
}

pub fn format_code(code: &RedemptionCode) -> String {
    let status = match (code.received_at, &code.username) {
        (Some(_), Some(user)) if !user.is_empty() => format!("received by {user}").dimmed(),
        (Some(_), _) => "received".dimmed(),
        (None, _) => "open".green(),
    };
    format!("{}  {:>8.2}  {}  {status}", code.code, code.amount, code.purpose)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::{ApiParams, CreditLogDetail, SimpleModel};

    #[test]
    fn parses_credit_logs_with_page() {
        let args = Args::parse_from(["chat-augment", "--token", "t", "credit", "logs", "--page", "2"]);
        assert_eq!(args.token.as_deref(), Some("t"));
        assert!(matches!(args.command, Command::Credit { action: CreditCommand::Logs { page: Some(2) } }));
    }

    #[test]
    fn parses_ticket() {
        let args = Args::parse_from([
            "chat-augment", "credit", "ticket", "--pay-type", "alipay", "--amount", "9.5",
        ]);
        match args.command {
            Command::Credit { action: CreditCommand::Ticket { pay_type, amount } } => {
                assert_eq!(pay_type, "alipay");
                assert_eq!(amount, 9.5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_codes_create_with_default_count() {
        let args = Args::parse_from([
            "chat-augment", "codes", "create", "--purpose", "promo", "--amount", "3",
        ]);
        assert!(matches!(
            args.command,
            Command::Codes { action: CodesCommand::Create { count: 1, .. } }
        ));
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let args = Args::parse_from([
            "chat-augment", "codes", "delete", "abc", "--base-url", "http://x/api/v1", "--json",
        ]);
        assert_eq!(args.base_url, "http://x/api/v1");
        assert!(args.json);
    }

    #[test]
    fn config_check_takes_path() {
        let args = Args::parse_from(["chat-augment", "config", "check", "augment.toml"]);
        assert!(matches!(
            args.command,
            Command::Config { action: ConfigCommand::Check { .. } }
        ));
    }

    #[test]
    fn missing_token_is_reported() {
        let args = Args {
            base_url: DEFAULT_BASE_URL.into(),
            token: None,
            json: false,
            command: Command::Credit { action: CreditCommand::Config },
        };
        let err = client(&args).err().unwrap();
        assert!(err.to_string().contains("CHAT_AUGMENT_TOKEN"));
    }

    #[test]
    fn log_row_prefers_model_name() {
        colored::control::set_override(false);
        let log = CreditLog {
            id: "l".into(),
            user_id: "u".into(),
            credit: -0.25,
            detail: CreditLogDetail {
                desc: "chat".into(),
                api_params: ApiParams {
                    model: SimpleModel {
                        id: Some("gpt-4o".into()),
                        name: Some("GPT-4o".into()),
                    },
                },
                ..Default::default()
            },
            created_at: 1_700_000_000,
            username: Some("ann".into()),
        };
        let row = format_log(&log);
        assert!(row.contains("-0.2500"), "{row}");
        assert!(row.contains("GPT-4o [ann]"), "{row}");
    }

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }
}
