//! Integration tests for PaymentSession
//!
//! These tests drive complete transactions over the mock reader and mock
//! backend and check the exact callback sequences handlers observe.

mod common;

use cardflow_backend::MockBackendConfig;
use cardflow_backend::mock::{MOCK_AUTHORIZATION_FAILURE_MESSAGE, MOCK_TOKENIZATION_FAILURE_MESSAGE};
use cardflow_core::CardReaderStatus::{self, *};
use cardflow_core::{CurrencyCode, Error, ErrorKind, PaymentMethod, PolicyConfig};
use cardflow_hardware::mock::{
    MOCK_APPLICATIONS, MOCK_READ_FAILURE_MESSAGE, MOCK_READER_NAME, MockReaderConfig,
    SECOND_MOCK_READER_NAME,
};
use common::{
    Answers, Event, TEST_AMOUNT, TEST_EMAIL, TEST_REFERENCE_ID, authorizer, config, harness,
    policy, read_errors, read_successes, recorder, statuses, wait_idle,
};
use rstest::rstest;
use std::time::Duration;

fn dip() -> MockReaderConfig {
    MockReaderConfig::default().with_payment_method(PaymentMethod::Dip)
}

fn swipe() -> MockReaderConfig {
    MockReaderConfig::default().with_payment_method(PaymentMethod::Swipe)
}

fn manual() -> MockReaderConfig {
    MockReaderConfig::default().with_auto_present(false)
}

// ============================================================================
// Read-only transactions
// ============================================================================

#[rstest]
#[case::stop_after_transaction(policy(false, false, true), vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped])]
#[case::stay_connected(policy(false, false, false), vec![Connected, CheckingReader, WaitingForCard, CardDipped])]
#[case::error_restart_ignored_on_success(policy(false, true, true), vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped])]
#[tokio::test]
async fn test_read_only_dip_sequence(
    #[case] policy: PolicyConfig,
    #[case] expected: Vec<CardReaderStatus>,
) {
    let h = harness(config(policy), dip(), MockBackendConfig::default());
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(statuses(&events), expected);
    assert_eq!(h.session.current_status(), *expected.last().unwrap());
    assert!(!h.session.is_transaction_active());

    let reads = read_successes(&events);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].payment_method, PaymentMethod::Dip);
    assert_eq!(reads[0].last_four(), "1111");
    assert_eq!(reads[0].application_label.as_deref(), Some(MOCK_APPLICATIONS[0]));
    // Read-only transactions never ask for the e-mail.
    assert_eq!(reads[0].email, None);
    assert!(read_errors(&events).is_empty());

    let expected_disconnects = usize::from(policy.stop_reader_after_transaction);
    assert_eq!(h.reader.disconnect_count(), expected_disconnects);
}

#[rstest]
#[case::stop_after_transaction(true)]
#[case::stay_connected(false)]
#[tokio::test]
async fn test_success_restart_is_repeatable(#[case] stop_reader_after_transaction: bool) {
    let h = harness(
        config(policy(true, false, stop_reader_after_transaction)),
        manual(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    let setup = events.until_status(WaitingForCard).await;
    assert_eq!(
        statuses(&setup),
        vec![Connected, CheckingReader, WaitingForCard]
    );

    for _ in 0..3 {
        h.reader.present_card(PaymentMethod::Dip).await.unwrap();
        let attempt = events.until_status(WaitingForCard).await;

        assert_eq!(statuses(&attempt), vec![CardDipped, WaitingForCard]);
        assert_eq!(read_successes(&attempt).len(), 1);
        assert!(h.session.is_transaction_active());
    }

    // Cancel wins over the restart policy.
    h.session.stop_card_reader();
    wait_idle(&h.session).await;
    let tail = events.settle().await;

    assert_eq!(statuses(&tail), vec![Stopped]);
    assert!(read_errors(&tail).is_empty());
    assert_eq!(h.reader.read_count(), 3);
    assert_eq!(h.reader.connect_count(), 1);
}

#[tokio::test]
async fn test_read_failure_stops_reader() {
    let h = harness(
        config(policy(false, false, true)),
        dip().with_card_read_failure(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped]
    );

    let errors = read_errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::EmvTransaction);
    assert_eq!(errors[0].message, MOCK_READ_FAILURE_MESSAGE);
    assert!(read_successes(&events).is_empty());
}

#[rstest]
#[case::stop_after_transaction(true)]
#[case::stay_connected(false)]
#[tokio::test]
async fn test_read_failure_restart_never_stops(#[case] stop_reader_after_transaction: bool) {
    let h = harness(
        config(policy(false, true, stop_reader_after_transaction)),
        manual().with_card_read_failure(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    events.until_status(WaitingForCard).await;

    for _ in 0..2 {
        h.reader.present_card(PaymentMethod::Dip).await.unwrap();
        let attempt = events.until_status(WaitingForCard).await;

        assert_eq!(statuses(&attempt), vec![CardDipped, WaitingForCard]);
        assert_eq!(read_errors(&attempt).len(), 1);
        assert!(h.session.is_transaction_active());
    }

    h.session.stop_card_reader();
    wait_idle(&h.session).await;
    assert_eq!(statuses(&events.settle().await), vec![Stopped]);
}

#[tokio::test]
async fn test_card_wait_timeout_reports_error() {
    let config = config(policy(false, false, true))
        .with_card_wait_timeout(Some(Duration::from_millis(50)));
    let h = harness(config, manual(), MockBackendConfig::default());
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![Connected, CheckingReader, WaitingForCard, Stopped]
    );
    assert_eq!(read_errors(&events)[0].kind, ErrorKind::CardReaderTimeout);
}

// ============================================================================
// Tokenizing transactions
// ============================================================================

#[tokio::test]
async fn test_tokenize_and_authorize_dip() {
    let h = harness(
        config(PolicyConfig::default()),
        dip(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler.clone(), authorizer(&handler))
        .unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![
            Connected,
            CheckingReader,
            WaitingForCard,
            CardDipped,
            Authorizing,
            Stopped
        ]
    );

    // Transaction info is confirmed before the reader is armed.
    let info_at = events
        .iter()
        .position(|e| matches!(e, Event::TransactionInfoRequested))
        .unwrap();
    let armed_at = events
        .iter()
        .position(|e| matches!(e, Event::Status(WaitingForCard)))
        .unwrap();
    assert!(info_at < armed_at);

    let reads = read_successes(&events);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].amount, Some(TEST_AMOUNT));
    assert_eq!(reads[0].currency, Some(CurrencyCode::Usd));
    assert_eq!(reads[0].reference_id, Some(TEST_REFERENCE_ID));
    assert_eq!(reads[0].email.as_deref(), Some(TEST_EMAIL));

    let authorizations: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Authorized(authorization) => Some(authorization.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(authorizations.len(), 1);
    assert_eq!(authorizations[0].amount, TEST_AMOUNT);
    assert_eq!(authorizations[0].currency, CurrencyCode::Usd);
    assert!(!events.iter().any(|e| matches!(e, Event::Tokenized(_))));

    assert_eq!(h.backend.tokenize_count(), 1);
    assert_eq!(h.backend.authorize_count(), 1);
}

#[rstest]
#[case::tokenize_only(false)]
#[case::swipe_is_never_authorized(true)]
#[tokio::test]
async fn test_tokenize_swipe(#[case] with_authorization: bool) {
    let h = harness(
        config(PolicyConfig::default()),
        swipe(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    let authorization = if with_authorization {
        authorizer(&handler)
    } else {
        None
    };
    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler, authorization)
        .unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![
            Connected,
            CheckingReader,
            WaitingForCard,
            SwipeDetected,
            Tokenizing,
            Stopped
        ]
    );
    assert!(events.iter().any(|e| matches!(e, Event::PayerEmailRequested)));
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::Tokenized(_)))
            .count(),
        1
    );
    assert!(!events.iter().any(|e| matches!(e, Event::Authorized(_))));
    assert_eq!(h.backend.authorize_count(), 0);
}

#[tokio::test]
async fn test_tokenization_failure_reaches_tokenization_handler() {
    let h = harness(
        config(PolicyConfig::default()),
        swipe(),
        MockBackendConfig::default().with_tokenization_failure(true),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler, None)
        .unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(statuses(&events).last(), Some(&Stopped));
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::TokenizationError(error) => Some(error.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Tokenization);
    assert_eq!(errors[0].message, MOCK_TOKENIZATION_FAILURE_MESSAGE);
    // The read itself succeeded.
    assert_eq!(read_successes(&events).len(), 1);
    assert!(read_errors(&events).is_empty());
}

#[rstest]
#[case::tokenization(
    MockBackendConfig::default().with_tokenization_failure(true),
    ErrorKind::Tokenization,
    MOCK_TOKENIZATION_FAILURE_MESSAGE
)]
#[case::authorization(
    MockBackendConfig::default().with_authorization_failure(true),
    ErrorKind::Authorization,
    MOCK_AUTHORIZATION_FAILURE_MESSAGE
)]
#[tokio::test]
async fn test_backend_failure_reaches_authorization_handler(
    #[case] backend: MockBackendConfig,
    #[case] kind: ErrorKind,
    #[case] message: &str,
) {
    let h = harness(config(PolicyConfig::default()), dip(), backend);
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler.clone(), authorizer(&handler))
        .unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![
            Connected,
            CheckingReader,
            WaitingForCard,
            CardDipped,
            Authorizing,
            Stopped
        ]
    );
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::AuthorizationError(error) => Some(error.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, kind);
    assert_eq!(errors[0].message, message);
    assert!(!events.iter().any(|e| matches!(e, Event::TokenizationError(_))));
}

#[tokio::test]
async fn test_backend_failure_restart() {
    let policy = PolicyConfig {
        restart_after_success: false,
        restart_after_other_errors: true,
        restart_after_backend_errors: true,
        stop_reader_after_transaction: true,
    };
    let h = harness(
        config(policy),
        manual(),
        MockBackendConfig::default().with_tokenization_failure(true),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler, None)
        .unwrap();
    events.until_status(WaitingForCard).await;

    h.reader.present_card(PaymentMethod::Swipe).await.unwrap();
    let attempt = events.until_status(WaitingForCard).await;
    assert_eq!(
        statuses(&attempt),
        vec![SwipeDetected, Tokenizing, WaitingForCard]
    );
    assert!(
        attempt
            .iter()
            .any(|e| matches!(e, Event::TokenizationError(_)))
    );

    h.session.stop_card_reader();
    wait_idle(&h.session).await;
    assert_eq!(statuses(&events.settle().await), vec![Stopped]);
}

#[rstest]
#[case::dip_stop_after_transaction(PaymentMethod::Dip, true, vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped])]
#[case::dip_stay_connected(PaymentMethod::Dip, false, vec![Connected, CheckingReader, WaitingForCard, CardDipped])]
#[case::swipe_stop_after_transaction(PaymentMethod::Swipe, true, vec![Connected, CheckingReader, WaitingForCard, SwipeDetected, Stopped])]
#[case::swipe_stay_connected(PaymentMethod::Swipe, false, vec![Connected, CheckingReader, WaitingForCard, SwipeDetected])]
#[tokio::test]
async fn test_tokenizing_read_failure_sequence(
    #[case] method: PaymentMethod,
    #[case] stop_reader_after_transaction: bool,
    #[case] expected: Vec<CardReaderStatus>,
) {
    let h = harness(
        config(policy(false, false, stop_reader_after_transaction)),
        MockReaderConfig::default()
            .with_payment_method(method)
            .with_card_read_failure(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler.clone(), authorizer(&handler))
        .unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(statuses(&events), expected);

    let errors = read_errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::EmvTransaction);
    assert!(read_successes(&events).is_empty());
    // A failed read never reaches the e-mail prompt or the backend.
    assert!(!events.iter().any(|e| matches!(e, Event::PayerEmailRequested)));
    assert_eq!(h.backend.tokenize_count(), 0);
}

#[tokio::test]
async fn test_tokenizing_read_failure_restart() {
    let h = harness(
        config(policy(false, true, true)),
        manual().with_card_read_failure(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler.clone(), authorizer(&handler))
        .unwrap();
    events.until_status(WaitingForCard).await;

    h.reader.present_card(PaymentMethod::Dip).await.unwrap();
    let attempt = events.until_status(WaitingForCard).await;
    assert_eq!(statuses(&attempt), vec![CardDipped, WaitingForCard]);
    assert_eq!(read_errors(&attempt).len(), 1);
    assert!(h.session.is_transaction_active());

    h.session.stop_card_reader();
    wait_idle(&h.session).await;
    assert_eq!(statuses(&events.settle().await), vec![Stopped]);
    assert_eq!(h.backend.tokenize_count(), 0);
}

#[tokio::test]
async fn test_authorized_success_restart() {
    let h = harness(
        config(policy(true, false, true)),
        manual(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler.clone(), authorizer(&handler))
        .unwrap();
    events.until_status(WaitingForCard).await;

    for _ in 0..2 {
        h.reader.present_card(PaymentMethod::Dip).await.unwrap();
        let attempt = events.until_status(WaitingForCard).await;

        assert_eq!(
            statuses(&attempt),
            vec![CardDipped, Authorizing, WaitingForCard]
        );
        assert_eq!(
            attempt
                .iter()
                .filter(|e| matches!(e, Event::Authorized(_)))
                .count(),
            1
        );
        assert!(attempt.iter().any(|e| matches!(e, Event::PayerEmailRequested)));
    }

    h.session.stop_card_reader();
    wait_idle(&h.session).await;
    assert_eq!(statuses(&events.settle().await), vec![Stopped]);
    assert_eq!(h.backend.authorize_count(), 2);
}

// ============================================================================
// Decision points
// ============================================================================

#[tokio::test]
async fn test_application_selection_rejects_second_answer() {
    let h = harness(
        config(PolicyConfig::default()),
        dip().with_multiple_emv_applications(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers {
        answer_application_twice: true,
        ..Answers::default()
    });

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![
            Connected,
            CheckingReader,
            WaitingForCard,
            CardDipped,
            SelectingApplication,
            Stopped
        ]
    );

    let offered = events.iter().find_map(|e| match e {
        Event::ApplicationSelection(applications) => Some(applications.clone()),
        _ => None,
    });
    assert_eq!(
        offered,
        Some(MOCK_APPLICATIONS.iter().map(|a| a.to_string()).collect())
    );

    let duplicate = events.iter().find_map(|e| match e {
        Event::DuplicateAnswer(result) => Some(result.clone()),
        _ => None,
    });
    assert!(matches!(
        duplicate,
        Some(Err(Error::ContinuationAlreadyResolved { .. }))
    ));

    // The first answer wins.
    let reads = read_successes(&events);
    assert_eq!(reads.len(), 1);
    assert_eq!(reads[0].application_label.as_deref(), Some(MOCK_APPLICATIONS[1]));
}

#[tokio::test]
async fn test_dropped_application_selection_is_contract_violation() {
    let h = harness(
        config(PolicyConfig::default()),
        dip().with_multiple_emv_applications(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers {
        select_application: false,
        ..Answers::default()
    });

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(statuses(&events).last(), Some(&Stopped));
    let errors = read_errors(&events);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::ContractViolation);
    assert!(read_successes(&events).is_empty());
}

#[tokio::test]
async fn test_dropped_transaction_info_aborts_before_arming() {
    let h = harness(
        config(PolicyConfig::default()),
        dip(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers {
        provide_transaction_info: false,
        ..Answers::default()
    });

    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler, None)
        .unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(
        statuses(&events),
        vec![Connected, CheckingReader, Stopped]
    );
    assert_eq!(read_errors(&events)[0].kind, ErrorKind::ContractViolation);
    assert_eq!(h.reader.read_count(), 0);
    assert_eq!(h.backend.tokenize_count(), 0);
}

#[rstest]
#[case::confirmed(true, vec![Connected, CheckingReader, ConfiguringReader, WaitingForCard, CardDipped, Stopped], 1)]
#[case::declined(false, vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped], 0)]
#[tokio::test]
async fn test_reader_reset_decision(
    #[case] confirm_reset: bool,
    #[case] expected: Vec<CardReaderStatus>,
    #[case] resets: usize,
) {
    let h = harness(
        config(PolicyConfig::default()),
        dip().with_reset_required(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers {
        confirm_reset,
        ..Answers::default()
    });

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let events = events.settle().await;

    assert_eq!(statuses(&events), expected);
    assert!(events.iter().any(|e| matches!(e, Event::ResetRequested)));
    assert_eq!(h.reader.reset_count(), resets);
}

#[tokio::test]
async fn test_card_reader_selection_is_remembered() {
    let h = harness(
        config(PolicyConfig::default()),
        dip().with_multiple_card_readers(true),
        MockBackendConfig::default(),
    );

    let (handler, mut events) = recorder(Answers {
        reader_index: 1,
        ..Answers::default()
    });
    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let first = events.settle().await;

    assert_eq!(
        statuses(&first),
        vec![
            SelectingCardReader,
            Connecting,
            Connected,
            CheckingReader,
            WaitingForCard,
            CardDipped,
            Stopped
        ]
    );
    let offered = first.iter().find_map(|e| match e {
        Event::CardReaderSelection(readers) => Some(readers.clone()),
        _ => None,
    });
    assert_eq!(
        offered,
        Some(vec![
            MOCK_READER_NAME.to_string(),
            SECOND_MOCK_READER_NAME.to_string()
        ])
    );
    assert_eq!(
        h.session.remembered_card_reader().as_deref(),
        Some(SECOND_MOCK_READER_NAME)
    );

    // The next transaction connects straight to the remembered reader.
    let (handler, mut events) = recorder(Answers::default());
    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    let second = events.settle().await;

    assert_eq!(
        statuses(&second),
        vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped]
    );
    assert!(
        !second
            .iter()
            .any(|e| matches!(e, Event::CardReaderSelection(_)))
    );

    h.session.forget_remembered_card_reader();
    assert_eq!(h.session.remembered_card_reader(), None);
}

// ============================================================================
// Cancellation
// ============================================================================

#[rstest]
#[case::authorizing(dip(), true, Authorizing)]
#[case::tokenizing(swipe(), false, Tokenizing)]
#[tokio::test]
async fn test_stop_during_backend_call_discards_result(
    #[case] reader: MockReaderConfig,
    #[case] with_authorization: bool,
    #[case] in_flight: CardReaderStatus,
) {
    let h = harness(
        config(PolicyConfig::default()),
        reader,
        MockBackendConfig::default().with_delay(Duration::from_millis(300)),
    );
    let (handler, mut events) = recorder(Answers::default());

    let authorization = if with_authorization {
        authorizer(&handler)
    } else {
        None
    };
    h.session
        .start_transaction_for_tokenizing(handler.clone(), handler, authorization)
        .unwrap();
    let before = events.until_status(in_flight).await;
    assert_eq!(read_successes(&before).len(), 1);

    h.session.stop_card_reader();
    wait_idle(&h.session).await;
    let tail = events.settle().await;

    assert_eq!(statuses(&tail), vec![Stopped]);
    assert!(!tail.iter().any(|e| matches!(
        e,
        Event::Tokenized(_)
            | Event::TokenizationError(_)
            | Event::Authorized(_)
            | Event::AuthorizationError(_)
    )));
    assert!(read_errors(&tail).is_empty());
    assert_eq!(h.backend.authorize_count(), 0);
    assert_eq!(h.session.current_status(), Stopped);
}

#[tokio::test]
async fn test_stop_during_application_selection() {
    // Restart policies never override an explicit stop.
    let h = harness(
        config(policy(true, true, true)),
        dip().with_multiple_emv_applications(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers {
        defer_application_selection: true,
        ..Answers::default()
    });

    h.session.start_transaction_for_reading(handler).unwrap();
    let before = events
        .until(|e| matches!(e, Event::ApplicationSelectionPending(_)))
        .await;
    assert_eq!(statuses(&before).last(), Some(&SelectingApplication));
    let Some(Event::ApplicationSelectionPending(selection)) = before.last().cloned() else {
        panic!("application selection not handed over");
    };

    h.session.stop_card_reader();
    selection.select(0).unwrap();
    wait_idle(&h.session).await;
    let tail = events.settle().await;

    assert_eq!(statuses(&tail), vec![Stopped]);
    assert!(read_successes(&tail).is_empty());
    assert!(read_errors(&tail).is_empty());
    assert_eq!(h.session.current_status(), Stopped);
}

#[rstest]
#[case::confirmed(true)]
#[case::declined(false)]
#[tokio::test]
async fn test_stop_during_reset_decision(#[case] confirm_reset: bool) {
    let h = harness(
        config(PolicyConfig::default()),
        dip().with_reset_required(true),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers {
        defer_reset: true,
        ..Answers::default()
    });

    h.session.start_transaction_for_reading(handler).unwrap();
    let before = events
        .until(|e| matches!(e, Event::ResetPending(_)))
        .await;
    assert_eq!(statuses(&before), vec![Connected, CheckingReader]);
    let Some(Event::ResetPending(decision)) = before.last().cloned() else {
        panic!("reset decision not handed over");
    };

    h.session.stop_card_reader();
    decision.confirm(confirm_reset).unwrap();
    wait_idle(&h.session).await;
    let tail = events.settle().await;

    assert_eq!(statuses(&tail), vec![Stopped]);
    assert!(read_errors(&tail).is_empty());
    assert_eq!(h.reader.reset_count(), 0);
    assert_eq!(h.reader.read_count(), 0);
}

// ============================================================================
// Session control
// ============================================================================

#[tokio::test]
async fn test_start_while_active_is_rejected() {
    let h = harness(
        config(PolicyConfig::default()),
        manual(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    events.until_status(WaitingForCard).await;

    let (intruder, mut intruder_events) = recorder(Answers::default());
    assert_eq!(
        h.session.start_transaction_for_reading(intruder),
        Err(Error::TransactionInProgress)
    );
    assert_eq!(
        h.session.card_reader_battery_level().await,
        Err(Error::TransactionInProgress)
    );

    h.session.stop_card_reader();
    wait_idle(&h.session).await;

    assert_eq!(statuses(&events.settle().await), vec![Stopped]);
    assert!(intruder_events.settle().await.is_empty());
}

#[tokio::test]
async fn test_rearmed_transaction_is_taken_over() {
    let h = harness(
        config(policy(true, false, true)),
        manual(),
        MockBackendConfig::default(),
    );
    let (first, mut first_events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(first).unwrap();
    first_events.until_status(WaitingForCard).await;
    h.reader.present_card(PaymentMethod::Dip).await.unwrap();
    first_events.until_status(WaitingForCard).await;

    let (second, mut second_events) = recorder(Answers::default());
    h.session.start_transaction_for_reading(second).unwrap();
    assert_eq!(
        statuses(&second_events.until_status(WaitingForCard).await),
        vec![WaitingForCard]
    );

    h.reader.present_card(PaymentMethod::Swipe).await.unwrap();
    let attempt = second_events.until_status(WaitingForCard).await;
    assert_eq!(statuses(&attempt), vec![SwipeDetected, WaitingForCard]);
    assert_eq!(read_successes(&attempt).len(), 1);

    h.session.stop_card_reader();
    wait_idle(&h.session).await;

    assert_eq!(statuses(&second_events.settle().await), vec![Stopped]);
    assert!(first_events.settle().await.is_empty());
    // The reader stayed connected across the takeover.
    assert_eq!(h.reader.connect_count(), 1);
}

#[tokio::test]
async fn test_stop_when_idle_and_connected() {
    let h = harness(
        config(policy(false, false, false)),
        dip(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    events.settle().await;
    assert_eq!(h.session.current_status(), CardDipped);

    h.session.stop_card_reader();
    wait_idle(&h.session).await;

    assert_eq!(statuses(&events.settle().await), vec![Stopped]);
    assert_eq!(h.session.current_status(), Stopped);
    assert_eq!(h.reader.disconnect_count(), 1);
}

#[tokio::test]
async fn test_unplugged_reader_ends_transaction() {
    let h = harness(
        config(PolicyConfig::default()),
        manual(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    events.until_status(WaitingForCard).await;

    h.reader.unplug().await.unwrap();
    wait_idle(&h.session).await;
    let tail = events.settle().await;

    // A lost reader is never announced as stopped.
    assert_eq!(statuses(&tail), vec![NotConnected]);
    assert_eq!(
        read_errors(&tail)[0].kind,
        ErrorKind::CardReaderCommunication
    );
    assert_eq!(h.session.current_status(), NotConnected);

    // The next transaction reconnects.
    let (handler, mut events) = recorder(Answers::default());
    h.session.start_transaction_for_reading(handler).unwrap();
    assert_eq!(
        statuses(&events.until_status(WaitingForCard).await),
        vec![Connected, CheckingReader, WaitingForCard]
    );
    h.session.stop_card_reader();
    wait_idle(&h.session).await;
}

#[tokio::test]
async fn test_callbacks_flushed_once_idle() {
    let h = harness(
        config(PolicyConfig::default()),
        dip(),
        MockBackendConfig::default(),
    );
    let (handler, mut events) = recorder(Answers::default());

    h.session.start_transaction_for_reading(handler).unwrap();
    wait_idle(&h.session).await;
    h.session.flush_callbacks().await;

    let events = events.drain();
    assert_eq!(
        statuses(&events),
        vec![Connected, CheckingReader, WaitingForCard, CardDipped, Stopped]
    );
    assert_eq!(read_successes(&events).len(), 1);
}

#[tokio::test]
async fn test_battery_level() {
    let h = harness(
        config(PolicyConfig::default()),
        MockReaderConfig::default().with_battery_level(37),
        MockBackendConfig::default(),
    );

    assert_eq!(h.session.card_reader_battery_level().await, Ok(37));
    assert_eq!(h.reader.connect_count(), 1);
    assert_eq!(h.reader.disconnect_count(), 1);
}
