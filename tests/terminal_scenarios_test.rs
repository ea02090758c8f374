mod common;

use common::{ack, assert_elapsed, final_response};
use getnet_pos::application::correlator::CorrelatorOptions;
use getnet_pos::application::session::Phase;
use getnet_pos::domain::command::{Command, Ticket};
use getnet_pos::domain::result::{ERROR_SDK, INVALID_AMOUNT};
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_approved_sale_round_trip() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());

    let responder = terminal.clone();
    tokio::spawn(async move {
        let command = responder.next_command().await;
        assert_eq!(command["Command"], 100);
        assert_eq!(command["Amount"], 15000);
        assert_eq!(command["TicketNumber"], "1");

        responder.reply(ack());
        responder.reply(final_response(json!({
            "ResponseCode": 0,
            "ResponseMessage": "Aprobado",
            "AuthorizationCode": "250349",
            "Amount": 15000,
            "Ticket": 1
        })));
    });

    let result = correlator.sale(15000, Ticket::from(1)).await;

    assert!(result.ok);
    assert_eq!(result.response_code, "0");
    assert_eq!(result.response_message, "Aprobado");
    assert_eq!(result.authorization_code.as_deref(), Some("250349"));
    assert_eq!(result.ticket_number.as_deref(), Some("1"));
    assert_eq!(result.amount, Some(15000));
    assert_eq!(correlator.pending_count(), 0);
    assert_eq!(correlator.session().phase(), Phase::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_silent_terminal_fails_with_sdk_error_after_response_window() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());
    let started = Instant::now();

    let result = correlator.sale(15000, Ticket::from(1)).await;

    // Sales wait for the long window; the receive window elapsing alone resolves nothing.
    assert_elapsed(started, Duration::from_secs(120));
    assert!(!result.ok);
    assert_eq!(result.response_code, ERROR_SDK);
    assert_eq!(correlator.session().phase(), Phase::TimedOutResponse);
    assert_eq!(terminal.sent_commands().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_acknowledged_but_unanswered_poll_times_out_at_min_window() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());
    let started = Instant::now();

    let responder = terminal.clone();
    tokio::spawn(async move {
        responder.next_command().await;
        responder.reply(ack());
    });

    let result = correlator
        .execute(Command::poll(), None)
        .await;

    assert_elapsed(started, Duration::from_secs(10));
    assert_eq!(result.response_code, ERROR_SDK);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_amounts_are_rejected_before_the_transport() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());

    for amount in [0, -5] {
        let result = correlator.sale(amount, Ticket::from(1)).await;
        assert!(!result.ok);
        assert_eq!(result.response_code, INVALID_AMOUNT);
    }

    assert!(terminal.sent_frames().is_empty());
    assert_eq!(terminal.connect_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_declined_sale_is_a_normal_result() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());

    let responder = terminal.clone();
    tokio::spawn(async move {
        responder.next_command().await;
        responder.reply(ack());
        responder.reply(final_response(json!({
            "ResponseCode": "05",
            "ResponseMessage": "No autorizado",
            "Ticket": "4"
        })));
    });

    let result = correlator.sale(2500, Ticket::from(4)).await;

    assert!(!result.ok);
    assert_eq!(result.response_code, "05");
    assert_eq!(result.response_message, "No autorizado");
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_timeout_does_not_complete_again() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());

    let first = correlator
        .sale_within(1000, Ticket::from(1), Some(Duration::from_secs(10)))
        .await;
    assert_eq!(first.response_code, ERROR_SDK);

    // The terminal finally answers the abandoned sale.
    terminal.reply(final_response(json!({"ResponseCode": 0, "Ticket": 1})));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(correlator.pending_count(), 0);

    // The engine keeps working for the next call.
    let responder = terminal.clone();
    tokio::spawn(async move {
        responder.next_command().await;
        responder.next_command().await;
        responder.reply(ack());
        responder.reply(common::approved(&json!("2")));
    });
    let second = correlator.sale(1000, Ticket::from(2)).await;
    assert!(second.ok);
    assert_eq!(second.ticket_number.as_deref(), Some("2"));
}

#[tokio::test(start_paused = true)]
async fn test_malformed_final_leaves_the_call_to_the_backstop() {
    let options = CorrelatorOptions {
        backstop_margin: Duration::from_secs(5),
        ..CorrelatorOptions::default()
    };
    let (correlator, terminal) = common::correlator(options);
    let started = Instant::now();

    let responder = terminal.clone();
    tokio::spawn(async move {
        responder.next_command().await;
        responder.reply(ack());
        responder.reply(json!({"JsonSerialized": "{\"ResponseCode\":"}));
    });

    let result = correlator
        .sale_within(1000, Ticket::from(1), Some(Duration::from_secs(20)))
        .await;

    // The response timer was stopped by the unreadable payload, so only the
    // correlator's own deadline ends the wait.
    assert_elapsed(started, Duration::from_secs(25));
    assert_eq!(result.response_code, ERROR_SDK);
    assert_eq!(correlator.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_terminal_fails_immediately() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());
    terminal.fail_connects(true);
    let started = Instant::now();

    let result = correlator.sale(1000, Ticket::from(1)).await;

    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(result.response_code, ERROR_SDK);
    assert_eq!(correlator.pending_count(), 0);
    assert_eq!(correlator.session().phase(), Phase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_link_open_is_bounded_by_the_shortest_window() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());
    terminal.stall_connects(true);
    let started = Instant::now();

    let result = correlator.execute(Command::poll(), None).await;

    assert_elapsed(started, Duration::from_secs(10));
    assert_eq!(result.response_code, ERROR_SDK);
    assert_eq!(correlator.pending_count(), 0);
    assert_eq!(correlator.session().phase(), Phase::Idle);

    // The engine is free again once the host answers.
    terminal.stall_connects(false);
    let responder = terminal.clone();
    tokio::spawn(async move {
        responder.next_command().await;
        responder.reply(final_response(json!({"ResponseCode": 0, "FunctionCode": 106})));
    });
    assert!(correlator.execute(Command::poll(), None).await.ok);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_write_is_cut_off_by_the_backstop() {
    let (correlator, terminal) = common::correlator(CorrelatorOptions::default());
    terminal.stall_sends(true);
    let started = Instant::now();

    let result = correlator.execute(Command::poll(), None).await;

    // Poll window (10 s) plus the default margin (5 s).
    assert_elapsed(started, Duration::from_secs(15));
    assert_eq!(result.response_code, ERROR_SDK);
    assert_eq!(correlator.pending_count(), 0);
}
