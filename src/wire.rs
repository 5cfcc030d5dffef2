//! Newline-delimited JSON front end. One request object per line, one response per line.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability::{REQUEST_DURATION_SECONDS, REQUESTS_TOTAL, request_label};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    CheckAvailability {
        check_in: NaiveDate,
        check_out: NaiveDate,
        beds: u32,
        #[serde(default)]
        exclude_booking_id: Option<Ulid>,
    },
    CreateHold {
        check_in: NaiveDate,
        check_out: NaiveDate,
        allocations: Vec<RoomAllocation>,
        /// Falls back to the configured hold TTL.
        #[serde(default)]
        ttl_secs: Option<u64>,
        payload: HoldPayload,
    },
    ConfirmHold {
        hold_id: Ulid,
        /// CONFIRMED unless the caller asks for PENDING_PAYMENT.
        #[serde(default)]
        status: Option<BookingStatus>,
    },
    ReleaseHold {
        hold_id: Ulid,
    },
    SweepExpired,
    SetBookingStatus {
        booking_id: Ulid,
        status: BookingStatus,
    },
    GetHold {
        hold_id: Ulid,
    },
    ListRooms,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok {
        result: serde_json::Value,
    },
    Error {
        kind: String,
        message: String,
        retryable: bool,
    },
}

impl Response {
    fn ok<T: Serialize>(value: T) -> Self {
        match serde_json::to_value(value) {
            Ok(result) => Response::Ok { result },
            Err(e) => Response::error("internal", e.to_string(), false),
        }
    }

    fn error(kind: &str, message: impl Into<String>, retryable: bool) -> Self {
        Response::Error {
            kind: kind.to_string(),
            message: message.into(),
            retryable,
        }
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::error(e.kind(), e.to_string(), e.is_retryable())
    }
}

fn into_response<T: Serialize>(result: Result<T, EngineError>) -> Response {
    match result {
        Ok(value) => Response::ok(value),
        Err(e) => e.into(),
    }
}

pub async fn execute(engine: &Engine, req: Request) -> Response {
    match req {
        Request::CheckAvailability {
            check_in,
            check_out,
            beds,
            exclude_booking_id,
        } => into_response(
            engine
                .check_availability(check_in, check_out, beds, exclude_booking_id)
                .await,
        ),
        Request::CreateHold {
            check_in,
            check_out,
            allocations,
            ttl_secs,
            payload,
        } => into_response(
            engine
                .create_hold(
                    check_in,
                    check_out,
                    allocations,
                    ttl_secs.map(Duration::from_secs),
                    payload,
                )
                .await,
        ),
        Request::ConfirmHold { hold_id, status } => into_response(
            engine
                .confirm_hold_as(hold_id, status.unwrap_or(BookingStatus::Confirmed))
                .await,
        ),
        Request::ReleaseHold { hold_id } => {
            let released = engine.release_hold(hold_id).await;
            Response::ok(serde_json::json!({ "released": released }))
        }
        Request::SweepExpired => {
            let expired = engine.sweep_expired().await;
            Response::ok(serde_json::json!({ "expired": expired }))
        }
        Request::SetBookingStatus { booking_id, status } => {
            into_response(engine.set_booking_status(booking_id, status).await)
        }
        Request::GetHold { hold_id } => match engine.get_hold(hold_id) {
            Some(hold) => Response::ok(hold),
            None => EngineError::HoldNotFound(hold_id).into(),
        },
        Request::ListRooms => Response::ok(engine.rooms()),
    }
}

async fn handle_line(engine: &Engine, line: &str) -> Response {
    let req: Request = match serde_json::from_str(line) {
        Ok(req) => req,
        Err(e) => {
            metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
            return Response::error("bad_request", e.to_string(), false);
        }
    };
    let op = request_label(&req);
    let start = std::time::Instant::now();
    let response = execute(engine, req).await;
    let status = match response {
        Response::Ok { .. } => "ok",
        Response::Error { .. } => "error",
    };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op)
        .record(start.elapsed().as_secs_f64());
    response
}

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

/// Serve one client until it disconnects. An over-long line gets an error response and
/// closes the connection.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    while let Some(line) = framed.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let response = Response::error(
                    "limit_exceeded",
                    format!("request line longer than {MAX_LINE_LEN} bytes"),
                    false,
                );
                framed.send(serde_json::to_string(&response)?).await.map_err(codec_err)?;
                break;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(&engine, &line).await;
        framed
            .send(serde_json::to_string(&response)?)
            .await
            .map_err(codec_err)?;
    }
    debug!("client disconnected");
    Ok(())
}
