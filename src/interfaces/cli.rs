use super::json::request_reader::PaymentRequestReader;
use super::json::result_writer::ResultWriter;
use crate::application::service::{PaymentMetadata, PaymentRequest, PaymentService};
use crate::config::ConfigArgs;
use crate::domain::command::{Amount, Command, CommandRequest, SaleRequest, SaleType, Ticket};
use crate::domain::result::CanonicalResult;
use crate::error::{Result, TerminalError};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Client for Getnet integrated card terminals", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Pretty-print the JSON written to stdout
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Charge a payment and print the normalized result
    Pay(PayArgs),
    /// Check that the terminal answers
    Poll(WindowArgs),
    /// Run a raw sale with an explicit ticket
    Sale(SaleArgs),
    /// Reprint the last voucher
    LastVoucher(PrintArgs),
    /// Refund an operation
    Refund(OperationArgs),
    /// Close the batch
    Close(PrintArgs),
    /// Totals report
    Totals(PrintArgs),
    /// Detailed sales report
    Details(PrintArgs),
    /// Put the terminal back in normal mode
    SetNormalMode(WindowArgs),
    /// Return a sale by authorization code
    Return(ReturnArgs),
    /// Duplicate voucher of another operation
    DuplicateOthers(OperationArgs),
    /// Sales report for one seller
    SalesBySeller(EmployeeArgs),
    /// Tip report for one seller
    TipReport(EmployeeArgs),
    /// Set the sale type used by default
    DefaultSaleType(SaleTypeArgs),
    /// Print the terminal parameters
    ParameterReport(PrintArgs),
    /// SIM card report
    SimReport(PrintArgs),
    /// Cancel the sale waiting on the terminal
    CancelSale(WindowArgs),
    /// Print the service status
    Status {
        /// Poll the terminal before reporting
        #[arg(long)]
        poll: bool,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct WindowArgs {
    /// Response window in seconds, clamped to the terminal's limits
    #[arg(long)]
    pub window_secs: Option<u64>,
}

impl WindowArgs {
    fn window(&self) -> Option<Duration> {
        self.window_secs.map(Duration::from_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct PrintArgs {
    /// Print the voucher on the terminal
    #[arg(long)]
    pub print_on_pos: bool,
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug, Clone)]
pub struct OperationArgs {
    #[arg(long)]
    pub operation_id: u64,
    #[command(flatten)]
    pub print: PrintArgs,
}

#[derive(Args, Debug, Clone)]
pub struct EmployeeArgs {
    #[arg(long)]
    pub employee_id: u32,
    #[command(flatten)]
    pub print: PrintArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ReturnArgs {
    #[arg(long)]
    pub authorization_code: String,
    #[arg(long, allow_negative_numbers = true)]
    pub amount: i64,
    #[command(flatten)]
    pub print: PrintArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SaleTypeArgs {
    /// Sale type discriminant (0 to 6)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=6))]
    pub sale_type: u8,
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args, Debug, Clone)]
pub struct SaleArgs {
    #[arg(long, allow_negative_numbers = true)]
    pub amount: i64,
    #[arg(long)]
    pub ticket: String,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=6))]
    pub sale_type: u8,
    #[arg(long)]
    pub send_message: bool,
    #[arg(long, default_value_t = 1)]
    pub employee_id: u32,
    #[command(flatten)]
    pub print: PrintArgs,
}

#[derive(Args, Debug, Clone)]
pub struct PayArgs {
    /// Amount in pesos; anything but a positive whole number is rejected
    #[arg(long, allow_negative_numbers = true, required_unless_present = "request")]
    pub amount: Option<String>,

    #[arg(long)]
    pub currency: Option<String>,

    #[arg(long)]
    pub caja_codigo: Option<String>,

    #[arg(long)]
    pub cajero: Option<String>,

    /// Read payment orders (JSON, one or more) from a file, `-` for stdin
    #[arg(long, conflicts_with = "amount")]
    pub request: Option<PathBuf>,
}

impl PayArgs {
    fn inline_request(&self) -> Option<PaymentRequest> {
        let amount = self.amount.as_deref()?;
        Some(PaymentRequest {
            // Non-numeric input stays a string so it is rejected as an invalid amount.
            amount: serde_json::from_str(amount).unwrap_or_else(|_| Value::from(amount)),
            currency: self.currency.clone(),
            metadata: PaymentMetadata {
                caja_codigo: self.caja_codigo.clone(),
                cajero: self.cajero.clone(),
            },
        })
    }
}

impl CliCommand {
    /// Runs the command against `service`, writing every result to `writer`.
    pub async fn run<W: Write>(
        self,
        service: &PaymentService,
        writer: &mut ResultWriter<W>,
    ) -> Result<()> {
        match self {
            CliCommand::Pay(args) => match args.inline_request() {
                Some(request) => writer.write(&service.pay(request).await),
                None => {
                    let source: Box<dyn Read> = match args.request.as_deref() {
                        Some(path) if path.as_os_str() != "-" => Box::new(File::open(path)?),
                        _ => Box::new(io::stdin()),
                    };
                    // Requests are charged one after another, in file order.
                    for request in PaymentRequestReader::new(source).requests() {
                        writer.write(&service.pay(request?).await)?;
                    }
                    Ok(())
                }
            },
            CliCommand::Status { poll } => {
                if poll {
                    service.init().await;
                }
                writer.write(&service.status())
            }
            CliCommand::Sale(args) => {
                let result = match Amount::new(args.amount) {
                    Ok(amount) => {
                        let ticket = Ticket::from(args.ticket);
                        let sale = SaleRequest {
                            print_on_pos: args.print.print_on_pos,
                            sale_type: SaleType::try_from(args.sale_type)?,
                            send_message: args.send_message,
                            employee_id: args.employee_id,
                            ..SaleRequest::new(amount, ticket.clone())
                        };
                        service
                            .correlator()
                            .call(Command::sale(sale), ticket, args.print.window.window())
                            .await
                    }
                    Err(err) => CanonicalResult::invalid_amount(err.to_string()),
                };
                writer.write(&result)
            }
            CliCommand::Return(args) => {
                let result = match Amount::new(args.amount) {
                    Ok(amount) => {
                        let request = CommandRequest::Return {
                            authorization_code: args.authorization_code,
                            amount,
                            print_on_pos: args.print.print_on_pos,
                        };
                        service
                            .correlator()
                            .execute(Command::new(request), args.print.window.window())
                            .await
                    }
                    Err(err) => CanonicalResult::invalid_amount(err.to_string()),
                };
                writer.write(&result)
            }
            other => {
                let (request, window) = other.catalog_request()?;
                let result = service
                    .correlator()
                    .execute(Command::new(request), window)
                    .await;
                writer.write(&result)
            }
        }
    }

    /// The catalog entry for commands that need no validation beyond argument parsing.
    fn catalog_request(self) -> Result<(CommandRequest, Option<Duration>)> {
        Ok(match self {
            CliCommand::Poll(window) => (CommandRequest::Poll, window.window()),
            CliCommand::SetNormalMode(window) => (CommandRequest::SetNormalMode, window.window()),
            CliCommand::CancelSale(window) => (CommandRequest::CancelSale, window.window()),
            CliCommand::LastVoucher(print) => (
                CommandRequest::LastVoucher {
                    print_on_pos: print.print_on_pos,
                },
                print.window.window(),
            ),
            CliCommand::Close(print) => (
                CommandRequest::Close {
                    print_on_pos: print.print_on_pos,
                },
                print.window.window(),
            ),
            CliCommand::Totals(print) => (
                CommandRequest::Totals {
                    print_on_pos: print.print_on_pos,
                },
                print.window.window(),
            ),
            CliCommand::Details(print) => (
                CommandRequest::Details {
                    print_on_pos: print.print_on_pos,
                },
                print.window.window(),
            ),
            CliCommand::ParameterReport(print) => (
                CommandRequest::ParameterReport {
                    print_on_pos: print.print_on_pos,
                },
                print.window.window(),
            ),
            CliCommand::SimReport(print) => (
                CommandRequest::SimReport {
                    print_on_pos: print.print_on_pos,
                },
                print.window.window(),
            ),
            CliCommand::Refund(args) => (
                CommandRequest::Refund {
                    operation_id: args.operation_id,
                    print_on_pos: args.print.print_on_pos,
                },
                args.print.window.window(),
            ),
            CliCommand::DuplicateOthers(args) => (
                CommandRequest::DuplicateOthers {
                    operation_id: args.operation_id,
                    print_on_pos: args.print.print_on_pos,
                },
                args.print.window.window(),
            ),
            CliCommand::SalesBySeller(args) => (
                CommandRequest::SalesBySeller {
                    employee_id: args.employee_id,
                    print_on_pos: args.print.print_on_pos,
                },
                args.print.window.window(),
            ),
            CliCommand::TipReport(args) => (
                CommandRequest::TipReport {
                    employee_id: args.employee_id,
                    print_on_pos: args.print.print_on_pos,
                },
                args.print.window.window(),
            ),
            CliCommand::DefaultSaleType(args) => (
                CommandRequest::DefaultSaleType {
                    sale_type: SaleType::try_from(args.sale_type)?,
                },
                args.window.window(),
            ),
            CliCommand::Pay(_)
            | CliCommand::Status { .. }
            | CliCommand::Sale(_)
            | CliCommand::Return(_) => {
                return Err(TerminalError::ValidationError(
                    "not a plain catalog command".to_string(),
                ));
            }
        })
    }
}
