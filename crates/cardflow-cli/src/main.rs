//! Cardflow CLI: run card-present transactions against the mock reader and
//! mock backend.
//!
//! Subcommands: read, tokenize, battery.

mod console;

use anyhow::Context;
use cardflow_backend::{MockBackendClient, MockBackendConfig};
use cardflow_core::{Config, CurrencyCode, Environment, PaymentMethod};
use cardflow_engine::PaymentSession;
use cardflow_hardware::mock::{MockCardReader, MockReaderConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::{ConsoleAnswers, ConsoleHandler};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Drive the transaction engine end to end with simulated peripherals.
#[derive(Parser, Debug)]
#[command(name = "cardflow", version, about, long_about = None)]
struct Cli {
    /// Session configuration as JSON. Defaults apply when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a card and print it.
    Read(TransactionArgs),
    /// Read a card and tokenize it, optionally authorizing chip reads.
    Tokenize(TokenizeArgs),
    /// Print the reader battery level.
    Battery(BatteryArgs),
}

#[derive(Args, Debug)]
struct ReaderArgs {
    /// How the simulated card is presented.
    #[arg(long, value_enum, default_value_t = Method::Dip)]
    method: Method,

    /// Fail every card read.
    #[arg(long)]
    read_failure: bool,

    /// Offer two EMV applications on chip reads.
    #[arg(long)]
    multiple_applications: bool,

    /// Discover two readers.
    #[arg(long)]
    multiple_readers: bool,

    /// Recommend a reset when the reader is checked.
    #[arg(long)]
    reset_required: bool,
}

#[derive(Args, Debug)]
struct BatteryArgs {
    /// Discover two readers.
    #[arg(long)]
    multiple_readers: bool,

    /// Simulated battery level.
    #[arg(long, default_value_t = 90)]
    level: u8,
}

#[derive(Args, Debug)]
struct TransactionArgs {
    #[command(flatten)]
    reader: ReaderArgs,

    /// Reader index picked when several are discovered.
    #[arg(long, default_value_t = 0)]
    reader_index: usize,

    /// Application index picked when several are offered.
    #[arg(long, default_value_t = 0)]
    application_index: usize,

    /// Accept a recommended reader reset.
    #[arg(long)]
    confirm_reset: bool,
}

#[derive(Args, Debug)]
struct TokenizeArgs {
    #[command(flatten)]
    transaction: TransactionArgs,

    /// Amount to charge.
    #[arg(long, default_value = "24.61")]
    amount: Decimal,

    #[arg(long, value_enum, default_value_t = Currency::Usd)]
    currency: Currency,

    /// Caller reference attached to the payment.
    #[arg(long, default_value_t = 1170640190)]
    reference_id: u64,

    /// Payer e-mail for the receipt.
    #[arg(long)]
    email: Option<String>,

    /// Authorize chip reads after tokenizing.
    #[arg(long)]
    authorize: bool,

    /// Fail every tokenization.
    #[arg(long)]
    tokenization_failure: bool,

    /// Fail every authorization.
    #[arg(long)]
    authorization_failure: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Method {
    Dip,
    Swipe,
    Tap,
}

impl From<Method> for PaymentMethod {
    fn from(method: Method) -> Self {
        match method {
            Method::Dip => PaymentMethod::Dip,
            Method::Swipe => PaymentMethod::Swipe,
            Method::Tap => PaymentMethod::Tap,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Currency {
    Usd,
    Cad,
    Gbp,
}

impl From<Currency> for CurrencyCode {
    fn from(currency: Currency) -> Self {
        match currency {
            Currency::Usd => CurrencyCode::Usd,
            Currency::Cad => CurrencyCode::Cad,
            Currency::Gbp => CurrencyCode::Gbp,
        }
    }
}

impl ReaderArgs {
    fn mock_config(&self) -> MockReaderConfig {
        MockReaderConfig::default()
            .with_payment_method(self.method.into())
            .with_card_read_failure(self.read_failure)
            .with_multiple_emv_applications(self.multiple_applications)
            .with_multiple_card_readers(self.multiple_readers)
            .with_reset_required(self.reset_required)
    }
}

impl BatteryArgs {
    fn mock_config(&self) -> MockReaderConfig {
        MockReaderConfig::default()
            .with_multiple_card_readers(self.multiple_readers)
            .with_battery_level(self.level)
    }
}

impl TransactionArgs {
    fn answers(&self) -> ConsoleAnswers {
        ConsoleAnswers {
            amount: Decimal::ZERO,
            currency: CurrencyCode::Usd,
            reference_id: 0,
            email: None,
            confirm_reset: self.confirm_reset,
            reader_index: self.reader_index,
            application_index: self.application_index,
        }
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    let Some(path) = path else {
        return Ok(Config::new("cardflow-cli", Environment::Stage));
    };

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: Config = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    Ok(config)
}

fn session(
    config: Config,
    reader: MockReaderConfig,
    backend: MockBackendConfig,
) -> anyhow::Result<PaymentSession> {
    let (reader, _reader_handle) = MockCardReader::new(reader);
    let (backend, _backend_handle) = MockBackendClient::new(backend);
    PaymentSession::new(config, reader.into(), backend.into()).context("Failed to create session")
}

/// Wait for the transaction to end, stopping the reader on Ctrl-C.
async fn run_to_completion(session: &PaymentSession) -> anyhow::Result<()> {
    tokio::select! {
        _ = session.wait_until_idle() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Interrupted, stopping card reader");
            session.stop_card_reader();
            session.wait_until_idle().await;
        }
    }

    session.flush_callbacks().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Read(args) => {
            let session = session(config, args.reader.mock_config(), MockBackendConfig::default())?;
            let handler = Arc::new(ConsoleHandler::new(args.answers()));
            session.start_transaction_for_reading(handler)?;
            run_to_completion(&session).await?;
        }
        Commands::Tokenize(args) => {
            let backend = MockBackendConfig::default()
                .with_tokenization_failure(args.tokenization_failure)
                .with_authorization_failure(args.authorization_failure);
            let session = session(config, args.transaction.reader.mock_config(), backend)?;

            let answers = ConsoleAnswers {
                amount: args.amount,
                currency: args.currency.into(),
                reference_id: args.reference_id,
                email: args.email.clone(),
                ..args.transaction.answers()
            };
            let handler = Arc::new(ConsoleHandler::new(answers));
            let authorization = if args.authorize {
                Some(Arc::clone(&handler) as Arc<dyn cardflow_engine::AuthorizationHandler>)
            } else {
                None
            };

            session.start_transaction_for_tokenizing(handler.clone(), handler, authorization)?;
            run_to_completion(&session).await?;
        }
        Commands::Battery(args) => {
            let session = session(config, args.mock_config(), MockBackendConfig::default())?;
            let level = session.card_reader_battery_level().await?;
            println!("Battery level: {}%", level);
        }
    }

    Ok(())
}
