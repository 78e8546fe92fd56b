use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use clinic_desk::{ApiClient, ApiError, ClinicApi};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use shared::{
    ApprovalDecision, ApprovalQueueQuery, AttendanceQuery, AttendanceStatus, LedgerQuery, MarkAttendanceRequest,
    PaymentMode, UpdateApprovalRequest,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Seen {
    query: Arc<Mutex<HashMap<String, String>>>,
    body: Arc<Mutex<Option<Value>>>,
    auth: Arc<Mutex<Option<String>>>,
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api", addr)
}

fn client(base_url: &str) -> ApiClient {
    ApiClient::with_base_url(base_url, Duration::from_secs(5)).unwrap()
}

fn money(v: &str) -> Decimal {
    v.parse().unwrap()
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

async fn record_get(State(seen): State<Seen>, headers: HeaderMap, Query(query): Query<HashMap<String, String>>) {
    *seen.query.lock().unwrap() = query;
    *seen.auth.lock().unwrap() = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
}

#[tokio::test]
async fn fetch_attendance_sends_filters_and_decodes_roster() {
    let seen = Seen::default();
    let app = Router::new()
        .route(
            "/api/attendance",
            get(
                |state: State<Seen>, headers: HeaderMap, query: Query<HashMap<String, String>>| async move {
                    record_get(state, headers, query).await;
                    Json(json!({
                        "status": "success",
                        "data": [
                            {
                                "patient_id": 41,
                                "patient_name": "Asha Rao",
                                "treatment_days": 12,
                                "sessions_attended": 4,
                                "cost_per_day": 450.5,
                                "effective_balance": -120.25,
                                "status": null
                            },
                            {
                                "patient_id": 42,
                                "patient_name": "Vikram Shah",
                                "treatment_days": null,
                                "sessions_attended": 9,
                                "cost_per_day": 300,
                                "effective_balance": 900,
                                "status": "present",
                                "attended_date": "2024-01-10"
                            }
                        ],
                        "stats": {"total_active": 2, "present": 1, "pending": 0, "absent": 1}
                    }))
                },
            ),
        )
        .with_state(seen.clone());
    let api = client(&serve(app).await).with_token("desk-token");

    let query = AttendanceQuery {
        search: Some("rao".to_string()),
        ..AttendanceQuery::for_day(3, date("2024-01-10"))
    };
    let response = api.fetch_attendance(&query).await.unwrap();

    let sent = seen.query.lock().unwrap().clone();
    assert_eq!(sent.get("branch_id").map(String::as_str), Some("3"));
    assert_eq!(sent.get("date").map(String::as_str), Some("2024-01-10"));
    assert_eq!(sent.get("search").map(String::as_str), Some("rao"));
    assert!(!sent.contains_key("status"));
    assert_eq!(seen.auth.lock().unwrap().as_deref(), Some("Bearer desk-token"));

    assert_eq!(response.data.len(), 2);
    assert_eq!(response.data[0].status, AttendanceStatus::None);
    assert_eq!(response.data[0].cost_per_day, money("450.5"));
    assert_eq!(response.data[0].effective_balance, money("-120.25"));
    assert_eq!(response.data[1].treatment_days, None);
    assert_eq!(response.data[1].attended_date, Some(date("2024-01-10")));
    assert_eq!(response.stats.absent, 1);
}

#[tokio::test]
async fn mark_attendance_posts_payment_as_json_numbers() {
    let seen = Seen::default();
    let app = Router::new()
        .route(
            "/api/mark_attendance",
            axum::routing::post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                *seen.body.lock().unwrap() = Some(body);
                Json(json!({"status": "success", "message": "Attendance marked"}))
            }),
        )
        .with_state(seen.clone());
    let api = client(&serve(app).await);

    let ack = api
        .mark_attendance(&MarkAttendanceRequest {
            patient_id: 41,
            employee_id: 7,
            payment_amount: money("300.50"),
            mode: Some(PaymentMode::Upi),
            remarks: Some("paid at desk".to_string()),
            mark_as_pending: false,
        })
        .await
        .unwrap();
    assert_eq!(ack.message.as_deref(), Some("Attendance marked"));

    let body = seen.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["patient_id"], json!(41));
    assert_eq!(body["payment_amount"].as_f64(), Some(300.5));
    assert_eq!(body["mode"], json!("upi"));
    assert_eq!(body["mark_as_pending"], json!(false));
}

#[tokio::test]
async fn error_envelope_surfaces_backend_message() {
    let app = Router::new().route(
        "/api/mark_attendance",
        axum::routing::post(|| async { Json(json!({"status": "error", "message": "Patient already marked today"})) }),
    );
    let api = client(&serve(app).await);

    let err = api
        .mark_attendance(&MarkAttendanceRequest {
            patient_id: 41,
            employee_id: 7,
            payment_amount: Decimal::ZERO,
            mode: None,
            remarks: None,
            mark_as_pending: false,
        })
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::backend("Patient already marked today"));
}

#[tokio::test]
async fn unknown_status_is_a_failure() {
    let app = Router::new().route(
        "/api/attendance",
        get(|| async { Json(json!({"status": "maintenance", "data": []})) }),
    );
    let api = client(&serve(app).await);

    let err = api
        .fetch_attendance(&AttendanceQuery::for_day(1, date("2024-01-10")))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Request failed");
}

#[tokio::test]
async fn http_errors_keep_status_and_envelope_message() {
    let app = Router::new()
        .route(
            "/api/ledger",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Fatal error in ledger.php").into_response() }),
        )
        .route(
            "/api/attendance_history",
            get(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"status": "error", "message": "Session expired"})),
                )
                    .into_response()
            }),
        );
    let api = client(&serve(app).await);

    let err = api
        .ledger(&LedgerQuery {
            branch_id: 1,
            start_date: date("2024-01-01"),
            end_date: date("2024-01-31"),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Http { status: 500, ref body } if body.contains("ledger.php")));

    let err = api.attendance_history(41).await.unwrap_err();
    assert_eq!(err, ApiError::backend("Session expired"));
}

#[tokio::test]
async fn ledger_and_history_decode() {
    let app = Router::new()
        .route(
            "/api/ledger",
            get(|| async {
                Json(json!({
                    "status": "success",
                    "summary": {
                        "total_income": 1500,
                        "total_expenses": 500,
                        "net_profit_loss": 1000,
                        "opening_balance": 2000,
                        "current_balance": 3000
                    },
                    "ledger": [{
                        "date": "2024-01-10",
                        "opening_balance": {"total": 2000, "cash": 1500, "online": 500},
                        "credits": {"total": 1500, "cash": 1000, "online": 500},
                        "debits": {"total": 500, "cash": 0, "online": 0},
                        "closing_balance": {"total": 3000, "cash": 2500, "online": 1000},
                        "transactions": [
                            {"description": "Payment", "entry_type": "credit", "source": "payment", "amount": 1000, "mode": "cash"},
                            {"description": "Payment", "entry_type": "credit", "source": "payment", "amount": 500, "mode": "card"},
                            {"description": "Session", "entry_type": "debit", "source": "session_charge", "amount": 500, "mode": null, "patient_id": 41}
                        ]
                    }]
                }))
            }),
        )
        .route(
            "/api/attendance_history",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                assert_eq!(query.get("patient_id").map(String::as_str), Some("41"));
                Json(json!({
                    "status": "success",
                    "data": {
                        "stats": {"total_days": null, "present_count": 3, "remaining": null},
                        "history": [
                            {"date": "2024-01-09", "status": "present"},
                            {"date": "2024-01-10", "status": "rejected", "remarks": "No-show"}
                        ]
                    }
                }))
            }),
        );
    let api = client(&serve(app).await);

    let ledger = api
        .ledger(&LedgerQuery {
            branch_id: 1,
            start_date: date("2024-01-10"),
            end_date: date("2024-01-10"),
        })
        .await
        .unwrap();
    assert_eq!(ledger.summary.unwrap().net_profit_loss, money("1000"));
    let day = &ledger.ledger[0];
    assert_eq!(day.closing_balance.online, money("1000"));
    assert_eq!(day.transactions[2].signed_amount(), money("-500"));
    assert_eq!(day.transactions[2].instrument(), None);
    assert!(clinic_desk::domain::ledger::LedgerAggregator::reconcile(&ledger.ledger).is_empty());

    let history = api.attendance_history(41).await.unwrap();
    assert_eq!(history.stats.total_days, None);
    assert_eq!(history.history[1].status, AttendanceStatus::Rejected);
    assert_eq!(history.history[1].remarks.as_deref(), Some("No-show"));
}

#[tokio::test]
async fn approval_endpoints_use_action_parameter() {
    let seen = Seen::default();
    let app = Router::new()
        .route(
            "/api/admin/attendance.php",
            get(
                |state: State<Seen>, headers: HeaderMap, query: Query<HashMap<String, String>>| async move {
                    record_get(state, headers, query).await;
                    Json(json!({
                        "status": "success",
                        "data": [{
                            "attendance_id": 900,
                            "patient_id": 41,
                            "patient_name": "Asha Rao",
                            "attendance_date": "2024-01-10",
                            "status": "pending",
                            "cost_per_day": 450
                        }]
                    }))
                },
            )
            .post(|State(seen): State<Seen>, Json(body): Json<Value>| async move {
                *seen.body.lock().unwrap() = Some(body);
                Json(json!({"status": "success", "message": "Status updated"}))
            }),
        )
        .with_state(seen.clone());
    let api = client(&serve(app).await);

    let pending = api
        .pending_approvals(&ApprovalQueueQuery::pending(3, None))
        .await
        .unwrap();
    assert_eq!(pending[0].attendance_date, date("2024-01-10"));
    assert_eq!(pending[0].cost_per_day, Some(money("450")));
    {
        let sent = seen.query.lock().unwrap();
        assert_eq!(sent.get("action").map(String::as_str), Some("fetch_attendance"));
        assert_eq!(sent.get("status").map(String::as_str), Some("pending"));
        assert_eq!(sent.get("branch_id").map(String::as_str), Some("3"));
    }

    api.update_approval(&UpdateApprovalRequest::new(
        900,
        ApprovalDecision::Rejected,
        2,
        Some("Duplicate".to_string()),
    ))
    .await
    .unwrap();
    let body = seen.body.lock().unwrap().clone().unwrap();
    assert_eq!(body["action"], json!("update_status"));
    assert_eq!(body["status"], json!("rejected"));
    assert_eq!(body["attendance_id"], json!(900));
    assert_eq!(body["remarks"], json!("Duplicate"));
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let api = client(&format!("http://{}/api", addr));
    let err = api.attendance_history(1).await.unwrap_err();
    assert!(err.is_transport(), "unexpected error {:?}", err);
}
