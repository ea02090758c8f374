use crate::error::{Result, TerminalError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numbered operations understood by the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    Sale,
    LastVoucher,
    Refund,
    Close,
    Totals,
    Details,
    Poll,
    SetNormalMode,
    Return,
    DuplicateOthers,
    SalesBySeller,
    TipReport,
    AlternativeSaleExemptedAffects,
    DefaultSaleType,
    ParameterReport,
    SimReport,
    CancelSale,
}

/// How long a command is normally allowed to wait for its final payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowClass {
    /// Status style commands, answered almost immediately.
    Short,
    Standard,
    /// Commands that wait on the cardholder.
    Long,
}

impl FunctionCode {
    pub const ALL: [FunctionCode; 17] = [
        FunctionCode::Sale,
        FunctionCode::LastVoucher,
        FunctionCode::Refund,
        FunctionCode::Close,
        FunctionCode::Totals,
        FunctionCode::Details,
        FunctionCode::Poll,
        FunctionCode::SetNormalMode,
        FunctionCode::Return,
        FunctionCode::DuplicateOthers,
        FunctionCode::SalesBySeller,
        FunctionCode::TipReport,
        FunctionCode::AlternativeSaleExemptedAffects,
        FunctionCode::DefaultSaleType,
        FunctionCode::ParameterReport,
        FunctionCode::SimReport,
        FunctionCode::CancelSale,
    ];

    pub fn code(self) -> u16 {
        match self {
            FunctionCode::Sale => 100,
            FunctionCode::LastVoucher => 101,
            FunctionCode::Refund => 102,
            FunctionCode::Close => 103,
            FunctionCode::Totals => 104,
            FunctionCode::Details => 105,
            FunctionCode::Poll => 106,
            FunctionCode::SetNormalMode => 107,
            FunctionCode::Return => 108,
            FunctionCode::DuplicateOthers => 109,
            FunctionCode::SalesBySeller => 110,
            FunctionCode::TipReport => 111,
            FunctionCode::AlternativeSaleExemptedAffects => 112,
            FunctionCode::DefaultSaleType => 113,
            FunctionCode::ParameterReport => 114,
            FunctionCode::SimReport => 115,
            FunctionCode::CancelSale => 116,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|f| u64::from(f.code()) == code)
    }

    pub fn window_class(self) -> WindowClass {
        match self {
            FunctionCode::Poll
            | FunctionCode::SetNormalMode
            | FunctionCode::DefaultSaleType
            | FunctionCode::SimReport
            | FunctionCode::CancelSale => WindowClass::Short,
            FunctionCode::Sale => WindowClass::Long,
            _ => WindowClass::Standard,
        }
    }
}

impl fmt::Display for FunctionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// Tax classification of a sale, sent as its integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SaleType {
    #[default]
    Sale = 0,
    SaleAffects = 1,
    InvoiceAffects = 2,
    SaleExempted = 3,
    InvoiceExempted = 4,
    CollectionAffects = 5,
    CollectionExempted = 6,
}

impl TryFrom<u8> for SaleType {
    type Error = TerminalError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => SaleType::Sale,
            1 => SaleType::SaleAffects,
            2 => SaleType::InvoiceAffects,
            3 => SaleType::SaleExempted,
            4 => SaleType::InvoiceExempted,
            5 => SaleType::CollectionAffects,
            6 => SaleType::CollectionExempted,
            other => {
                return Err(TerminalError::ValidationError(format!(
                    "Unknown sale type {other}"
                )));
            }
        })
    }
}

impl Serialize for SaleType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

/// A strictly positive amount in whole Chilean pesos.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Amount(u64);

impl Amount {
    pub fn new(value: i64) -> Result<Self> {
        if value > 0 {
            Ok(Self(value as u64))
        } else {
            Err(TerminalError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl TryFrom<i64> for Amount {
    type Error = TerminalError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

/// Accepts any JSON number that is a positive whole amount.
impl TryFrom<&serde_json::Value> for Amount {
    type Error = TerminalError;

    fn try_from(value: &serde_json::Value) -> Result<Self> {
        let number = value.as_number().ok_or_else(|| {
            TerminalError::ValidationError("Amount must be a number".to_string())
        })?;

        if let Some(v) = number.as_i64() {
            return Self::new(v);
        }
        if number.as_u64().is_some() {
            return Err(TerminalError::ValidationError(
                "Amount is out of range".to_string(),
            ));
        }
        match number.as_f64() {
            Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Self::new(v as i64),
            Some(v) if v <= 0.0 => Self::new(0),
            _ => Err(TerminalError::ValidationError(
                "Amount must be a whole number of pesos".to_string(),
            )),
        }
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-assigned correlation identifier for one command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ticket(String);

impl Ticket {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for Ticket {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Ticket {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Ticket {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaleRequest {
    pub amount: Amount,
    pub ticket: Ticket,
    pub print_on_pos: bool,
    pub sale_type: SaleType,
    pub send_message: bool,
    pub employee_id: u32,
}

impl SaleRequest {
    pub fn new(amount: Amount, ticket: Ticket) -> Self {
        Self {
            amount,
            ticket,
            print_on_pos: false,
            sale_type: SaleType::Sale,
            send_message: false,
            employee_id: 1,
        }
    }
}

/// Command-specific payload of every catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandRequest {
    Poll,
    Sale(SaleRequest),
    LastVoucher { print_on_pos: bool },
    Refund { operation_id: u64, print_on_pos: bool },
    Close { print_on_pos: bool },
    Totals { print_on_pos: bool },
    Details { print_on_pos: bool },
    SetNormalMode,
    Return {
        authorization_code: String,
        amount: Amount,
        print_on_pos: bool,
    },
    DuplicateOthers { operation_id: u64, print_on_pos: bool },
    SalesBySeller { employee_id: u32, print_on_pos: bool },
    TipReport { employee_id: u32, print_on_pos: bool },
    DefaultSaleType { sale_type: SaleType },
    ParameterReport { print_on_pos: bool },
    SimReport { print_on_pos: bool },
    CancelSale,
}

impl CommandRequest {
    pub fn function(&self) -> FunctionCode {
        match self {
            CommandRequest::Poll => FunctionCode::Poll,
            CommandRequest::Sale(_) => FunctionCode::Sale,
            CommandRequest::LastVoucher { .. } => FunctionCode::LastVoucher,
            CommandRequest::Refund { .. } => FunctionCode::Refund,
            CommandRequest::Close { .. } => FunctionCode::Close,
            CommandRequest::Totals { .. } => FunctionCode::Totals,
            CommandRequest::Details { .. } => FunctionCode::Details,
            CommandRequest::SetNormalMode => FunctionCode::SetNormalMode,
            CommandRequest::Return { .. } => FunctionCode::Return,
            CommandRequest::DuplicateOthers { .. } => FunctionCode::DuplicateOthers,
            CommandRequest::SalesBySeller { .. } => FunctionCode::SalesBySeller,
            CommandRequest::TipReport { .. } => FunctionCode::TipReport,
            CommandRequest::DefaultSaleType { .. } => FunctionCode::DefaultSaleType,
            CommandRequest::ParameterReport { .. } => FunctionCode::ParameterReport,
            CommandRequest::SimReport { .. } => FunctionCode::SimReport,
            CommandRequest::CancelSale => FunctionCode::CancelSale,
        }
    }
}

/// A single terminal command, stamped with its creation time.
///
/// Serializes as `{"Command": <code>, <fields...>, "DateTime": "<ISO-8601>"}` with a
/// stable field order, since the signature covers the exact serialized bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    request: CommandRequest,
    date_time: DateTime<Utc>,
}

impl Command {
    pub fn new(request: CommandRequest) -> Self {
        Self::at(request, Utc::now())
    }

    pub fn at(request: CommandRequest, date_time: DateTime<Utc>) -> Self {
        Self { request, date_time }
    }

    pub fn poll() -> Self {
        Self::new(CommandRequest::Poll)
    }

    pub fn sale(sale: SaleRequest) -> Self {
        Self::new(CommandRequest::Sale(sale))
    }

    pub fn function(&self) -> FunctionCode {
        self.request.function()
    }

    pub fn request(&self) -> &CommandRequest {
        &self.request
    }

    pub fn date_time(&self) -> DateTime<Utc> {
        self.date_time
    }

    /// The ticket carried on the wire, only sales have one.
    pub fn ticket(&self) -> Option<&Ticket> {
        match &self.request {
            CommandRequest::Sale(sale) => Some(&sale.ticket),
            _ => None,
        }
    }
}

impl Serialize for Command {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Command", &self.function().code())?;

        match &self.request {
            CommandRequest::Poll | CommandRequest::SetNormalMode | CommandRequest::CancelSale => {}
            CommandRequest::Sale(sale) => {
                map.serialize_entry("Amount", &sale.amount)?;
                map.serialize_entry("TicketNumber", &sale.ticket)?;
                map.serialize_entry("PrintOnPos", &sale.print_on_pos)?;
                map.serialize_entry("SaleType", &sale.sale_type)?;
                map.serialize_entry("SendMessage", &sale.send_message)?;
                map.serialize_entry("EmployeeId", &sale.employee_id)?;
            }
            CommandRequest::LastVoucher { print_on_pos }
            | CommandRequest::Close { print_on_pos }
            | CommandRequest::Totals { print_on_pos }
            | CommandRequest::Details { print_on_pos }
            | CommandRequest::ParameterReport { print_on_pos }
            | CommandRequest::SimReport { print_on_pos } => {
                map.serialize_entry("PrintOnPos", print_on_pos)?;
            }
            CommandRequest::Refund {
                operation_id,
                print_on_pos,
            }
            | CommandRequest::DuplicateOthers {
                operation_id,
                print_on_pos,
            } => {
                map.serialize_entry("OperationId", operation_id)?;
                map.serialize_entry("PrintOnPos", print_on_pos)?;
            }
            CommandRequest::Return {
                authorization_code,
                amount,
                print_on_pos,
            } => {
                map.serialize_entry("AuthorizationCode", authorization_code)?;
                map.serialize_entry("Amount", amount)?;
                map.serialize_entry("PrintOnPos", print_on_pos)?;
            }
            CommandRequest::SalesBySeller {
                employee_id,
                print_on_pos,
            }
            | CommandRequest::TipReport {
                employee_id,
                print_on_pos,
            } => {
                map.serialize_entry("EmployeeId", employee_id)?;
                map.serialize_entry("PrintOnPos", print_on_pos)?;
            }
            CommandRequest::DefaultSaleType { sale_type } => {
                map.serialize_entry("SaleType", sale_type)?;
            }
        }

        map.serialize_entry(
            "DateTime",
            &self.date_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_function_codes_roundtrip() {
        for function in FunctionCode::ALL {
            assert_eq!(
                FunctionCode::from_code(function.code() as u64),
                Some(function)
            );
        }
        assert_eq!(FunctionCode::Sale.code(), 100);
        assert_eq!(FunctionCode::Poll.code(), 106);
        assert_eq!(FunctionCode::from_code(99), None);
    }

    #[test]
    fn test_window_classes() {
        assert_eq!(FunctionCode::Sale.window_class(), WindowClass::Long);
        assert_eq!(FunctionCode::Poll.window_class(), WindowClass::Short);
        assert_eq!(FunctionCode::CancelSale.window_class(), WindowClass::Short);
        assert_eq!(FunctionCode::Refund.window_class(), WindowClass::Standard);
    }

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(1).is_ok());
        assert!(matches!(
            Amount::new(0),
            Err(TerminalError::ValidationError(_))
        ));
        assert!(matches!(
            Amount::new(-100),
            Err(TerminalError::ValidationError(_))
        ));
    }

    #[test]
    fn test_amount_from_json() {
        use serde_json::json;

        assert_eq!(Amount::try_from(&json!(15000)).unwrap().value(), 15000);
        assert_eq!(Amount::try_from(&json!(15000.0)).unwrap().value(), 15000);
        assert!(Amount::try_from(&json!("15000")).is_err());
        assert!(Amount::try_from(&json!(null)).is_err());
        assert!(Amount::try_from(&json!(-5)).is_err());
        assert!(Amount::try_from(&json!(-5.5)).is_err());
        assert!(Amount::try_from(&json!(10.5)).is_err());
    }

    #[test]
    fn test_sale_serialization_field_order() {
        let sale = SaleRequest::new(Amount::new(15000).unwrap(), Ticket::from(1));
        let command = Command::at(CommandRequest::Sale(sale), fixed_time());

        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(
            json,
            r#"{"Command":100,"Amount":15000,"TicketNumber":"1","PrintOnPos":false,"SaleType":0,"SendMessage":false,"EmployeeId":1,"DateTime":"2025-01-02T03:04:05.000Z"}"#
        );
    }

    #[test]
    fn test_poll_serialization() {
        let command = Command::at(CommandRequest::Poll, fixed_time());
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(
            json,
            r#"{"Command":106,"DateTime":"2025-01-02T03:04:05.000Z"}"#
        );
    }

    #[test]
    fn test_return_serialization() {
        let command = Command::at(
            CommandRequest::Return {
                authorization_code: "250349".to_string(),
                amount: Amount::new(500).unwrap(),
                print_on_pos: true,
            },
            fixed_time(),
        );
        let value: serde_json::Value = serde_json::to_value(&command).unwrap();
        assert_eq!(value["Command"], 108);
        assert_eq!(value["AuthorizationCode"], "250349");
        assert_eq!(value["Amount"], 500);
        assert_eq!(value["PrintOnPos"], true);
    }

    #[test]
    fn test_sale_type_conversion() {
        assert_eq!(SaleType::try_from(6).unwrap(), SaleType::CollectionExempted);
        assert!(SaleType::try_from(7).is_err());
        assert_eq!(
            serde_json::to_string(&SaleType::InvoiceAffects).unwrap(),
            "2"
        );
    }
}
