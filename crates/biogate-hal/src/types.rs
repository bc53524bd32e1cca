//! Request, reply and callback types exchanged with a driver.

use biogate_core::{HardwareAuthToken, OperationTag, SensorId, TemplateId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Touch coordinates reported by an under-display sensor overlay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerContext {
    pub pointer_id: i32,
    pub x: f32,
    pub y: f32,
    pub minor: f32,
    pub major: f32,
}

impl PointerContext {
    /// Create a pointer context at the given position.
    pub fn at(pointer_id: i32, x: f32, y: f32) -> Self {
        Self {
            pointer_id,
            x,
            y,
            ..Default::default()
        }
    }
}

/// One device-level primitive submitted to a session.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum HalRequest {
    GenerateChallenge,
    RevokeChallenge { challenge: u64 },
    Enroll { hat: HardwareAuthToken },
    Authenticate { operation_id: u64 },
    DetectInteraction,
    EnumerateEnrollments,
    RemoveEnrollments { template_ids: Vec<TemplateId> },
    GetAuthenticatorId,
    InvalidateAuthenticatorId,
    ResetLockout { hat: Option<HardwareAuthToken> },
    PointerDown(PointerContext),
    PointerUp(PointerContext),
    UiReady,
}

impl HalRequest {
    /// Returns `true` if the driver answers this request with a terminal reply.
    ///
    /// Touch notifications only feed an operation that is already running.
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            HalRequest::PointerDown(_) | HalRequest::PointerUp(_) | HalRequest::UiReady
        )
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            HalRequest::GenerateChallenge => "generate_challenge",
            HalRequest::RevokeChallenge { .. } => "revoke_challenge",
            HalRequest::Enroll { .. } => "enroll",
            HalRequest::Authenticate { .. } => "authenticate",
            HalRequest::DetectInteraction => "detect_interaction",
            HalRequest::EnumerateEnrollments => "enumerate_enrollments",
            HalRequest::RemoveEnrollments { .. } => "remove_enrollments",
            HalRequest::GetAuthenticatorId => "get_authenticator_id",
            HalRequest::InvalidateAuthenticatorId => "invalidate_authenticator_id",
            HalRequest::ResetLockout { .. } => "reset_lockout",
            HalRequest::PointerDown(_) => "pointer_down",
            HalRequest::PointerUp(_) => "pointer_up",
            HalRequest::UiReady => "ui_ready",
        }
    }
}

/// Error codes a driver can report for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum HalErrorCode {
    HwUnavailable,
    UnableToProcess,
    Timeout,
    NoSpace,
    Canceled,
    UnableToRemove,
    BadCalibration,
    Vendor,
}

impl fmt::Display for HalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::HwUnavailable => "hw_unavailable",
            Self::UnableToProcess => "unable_to_process",
            Self::Timeout => "timeout",
            Self::NoSpace => "no_space",
            Self::Canceled => "canceled",
            Self::UnableToRemove => "unable_to_remove",
            Self::BadCalibration => "bad_calibration",
            Self::Vendor => "vendor",
        };
        write!(f, "{}", s)
    }
}

/// Reply or event emitted by a driver session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HalReply {
    ChallengeGenerated { challenge: u64 },
    ChallengeRevoked { challenge: u64 },
    /// A finger was seen; not terminal.
    Acquired,
    /// Enrollment advanced; terminal when `remaining` is zero.
    EnrollmentProgress { template_id: TemplateId, remaining: u32 },
    Authenticated { template_id: TemplateId },
    /// A finger did not match; authentication keeps running.
    AuthenticationFailed,
    LockoutTimed { duration_ms: u64 },
    LockoutPermanent,
    LockoutCleared,
    InteractionDetected,
    EnrollmentsEnumerated(Vec<TemplateId>),
    EnrollmentsRemoved(Vec<TemplateId>),
    AuthenticatorIdRetrieved(u64),
    AuthenticatorIdInvalidated(u64),
    Error { code: HalErrorCode, vendor_code: i32 },
}

impl HalReply {
    /// Create an error reply without a vendor code.
    pub fn error(code: HalErrorCode) -> Self {
        HalReply::Error {
            code,
            vendor_code: 0,
        }
    }

    /// Create the reply a driver sends after honouring a cancel.
    pub fn canceled() -> Self {
        Self::error(HalErrorCode::Canceled)
    }
}

/// A reply together with the session and operation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HalEvent {
    pub sensor_id: SensorId,
    pub user_id: UserId,
    /// Tag of the request this reply answers; `None` for unsolicited events.
    pub tag: Option<OperationTag>,
    pub reply: HalReply,
}

/// Destination for events emitted by sessions.
pub type EventSink = Arc<dyn Fn(HalEvent) + Send + Sync>;

/// Callback handed to a driver when a session is created.
///
/// The driver calls [`SessionCallback::emit`] from whatever thread it likes;
/// the sink is expected to post the event to the caller's own context.
#[derive(Clone)]
pub struct SessionCallback {
    sensor_id: SensorId,
    user_id: UserId,
    sink: EventSink,
}

impl SessionCallback {
    pub fn new(sensor_id: SensorId, user_id: UserId, sink: EventSink) -> Self {
        Self {
            sensor_id,
            user_id,
            sink,
        }
    }

    pub fn sensor_id(&self) -> SensorId {
        self.sensor_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Deliver a reply for this session.
    pub fn emit(&self, tag: Option<OperationTag>, reply: HalReply) {
        (self.sink)(HalEvent {
            sensor_id: self.sensor_id,
            user_id: self.user_id,
            tag,
            reply,
        });
    }
}

impl fmt::Debug for SessionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallback")
            .field("sensor_id", &self.sensor_id)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// Liveness callback registered on a connection.
///
/// Invoked at most once; later calls to [`DeathRecipient::notify`] do nothing.
///
/// # Examples
///
/// ```
/// use biogate_hal::DeathRecipient;
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// let count = Arc::new(AtomicU32::new(0));
/// let c = Arc::clone(&count);
/// let recipient = DeathRecipient::new(move || {
///     c.fetch_add(1, Ordering::SeqCst);
/// });
///
/// assert!(recipient.notify());
/// assert!(!recipient.notify());
/// assert_eq!(count.load(Ordering::SeqCst), 1);
/// ```
pub struct DeathRecipient {
    callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl DeathRecipient {
    pub fn new(callback: impl FnOnce() + Send + 'static) -> Self {
        Self {
            callback: Mutex::new(Some(Box::new(callback))),
        }
    }

    /// Run the callback if it has not run yet. Returns whether it ran.
    pub fn notify(&self) -> bool {
        let callback = match self.callback.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DeathRecipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeathRecipient").finish_non_exhaustive()
    }
}
