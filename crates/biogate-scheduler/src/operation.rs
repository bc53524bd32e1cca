//! Operations: one unit of hardware work on one sensor.
//!
//! Each kind carries only the fields it needs. Capability questions ("does
//! this accept touch input?", "is this an authentication?") are answered by
//! matching on [`OperationKind`].

use crate::cleanup::ReconciliationReport;
use crate::error::OperationError;
use biogate_core::{
    ClientToken, Cookie, HardwareAuthToken, OwnerId, RequestId, SensorId, TemplateId, UserId,
};
use serde::Serialize;
use std::fmt;

/// Progress of an internal cleanup across its driver round trips.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupState {
    pub favor_hal_enrollments: bool,
    /// Set once the store has been reconciled and orphans are being removed
    /// from the driver.
    pub(crate) report: Option<ReconciliationReport>,
}

impl CleanupState {
    pub fn new(favor_hal_enrollments: bool) -> Self {
        Self {
            favor_hal_enrollments,
            report: None,
        }
    }
}

/// What an operation does.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum OperationKind {
    /// Enroll a new template. `name` overrides the generated "Finger N".
    Enroll {
        hat: HardwareAuthToken,
        name: Option<String>,
    },

    /// Authenticate the user, binding the result to `operation_id`.
    Authenticate {
        operation_id: u64,
        /// Exempt from the foreground policy (e.g. a system prompt).
        allow_background: bool,
    },

    /// Report that a finger touched the sensor, without matching.
    DetectInteraction,

    Remove {
        template_ids: Vec<TemplateId>,
    },

    /// Remove every template the store lists for the user.
    RemoveAll,

    GenerateChallenge,

    RevokeChallenge {
        challenge: u64,
    },

    ResetLockout {
        hat: Option<HardwareAuthToken>,
    },

    /// Reload the user's authenticator id from the driver.
    LoadAuthenticatorId,

    InvalidateAuthenticatorId,

    /// Reconcile the template store with the driver's enrollments.
    InternalCleanup(CleanupState),
}

impl OperationKind {
    /// Cleanup with the given policy for templates only the driver knows.
    pub fn internal_cleanup(favor_hal_enrollments: bool) -> Self {
        OperationKind::InternalCleanup(CleanupState::new(favor_hal_enrollments))
    }

    /// Short name used in logs and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Enroll { .. } => "enroll",
            OperationKind::Authenticate { .. } => "authenticate",
            OperationKind::DetectInteraction => "detect_interaction",
            OperationKind::Remove { .. } => "remove",
            OperationKind::RemoveAll => "remove_all",
            OperationKind::GenerateChallenge => "generate_challenge",
            OperationKind::RevokeChallenge { .. } => "revoke_challenge",
            OperationKind::ResetLockout { .. } => "reset_lockout",
            OperationKind::LoadAuthenticatorId => "load_authenticator_id",
            OperationKind::InvalidateAuthenticatorId => "invalidate_authenticator_id",
            OperationKind::InternalCleanup(_) => "internal_cleanup",
        }
    }

    /// Operations that wait for the user rather than the driver.
    ///
    /// These have no reply deadline; they end by finger, cancel or error.
    pub fn is_interactive(&self) -> bool {
        matches!(
            self,
            OperationKind::Enroll { .. }
                | OperationKind::Authenticate { .. }
                | OperationKind::DetectInteraction
        )
    }

    /// Whether touch events from an under-display overlay are forwarded.
    pub fn accepts_touch(&self) -> bool {
        self.is_interactive()
    }

    /// Whether `cancel_authentication_or_detection` applies.
    pub fn is_authentication_or_detection(&self) -> bool {
        matches!(
            self,
            OperationKind::Authenticate { .. } | OperationKind::DetectInteraction
        )
    }

    pub fn is_enrollment(&self) -> bool {
        matches!(self, OperationKind::Enroll { .. })
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One scheduled unit of hardware work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub request_id: RequestId,
    pub token: ClientToken,
    pub owner: OwnerId,
    pub sensor_id: SensorId,
    pub user_id: UserId,
    /// Holds the operation in the queue until the cookie is released.
    pub cookie: Option<Cookie>,
    pub kind: OperationKind,
}

impl Operation {
    pub fn new(
        request_id: RequestId,
        token: ClientToken,
        owner: OwnerId,
        sensor_id: SensorId,
        user_id: UserId,
        kind: OperationKind,
    ) -> Self {
        Self {
            request_id,
            token,
            owner,
            sensor_id,
            user_id,
            cookie: None,
            kind,
        }
    }

    #[must_use]
    pub fn with_cookie(mut self, cookie: Cookie) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Whether this operation has the given identity.
    pub fn matches(&self, token: &ClientToken, request_id: RequestId) -> bool {
        self.token == *token && self.request_id == request_id
    }

    /// Serializable snapshot of the identity and kind.
    pub fn info(&self) -> OperationInfo {
        OperationInfo {
            request_id: self.request_id,
            token: self.token,
            owner: self.owner.clone(),
            sensor_id: self.sensor_id,
            user_id: self.user_id,
            kind: self.kind.name(),
            cookie: self.cookie,
        }
    }
}

/// Identity and kind of an operation, without secrets or driver state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationInfo {
    pub request_id: RequestId,
    pub token: ClientToken,
    pub owner: OwnerId,
    pub sensor_id: SensorId,
    pub user_id: UserId,
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cookie: Option<Cookie>,
}

/// Payload of a successful operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum OperationResult {
    Enrolled { template_id: TemplateId, name: String },
    Authenticated { template_id: TemplateId },
    InteractionDetected,
    Removed { template_ids: Vec<TemplateId> },
    ChallengeGenerated { challenge: u64 },
    ChallengeRevoked { challenge: u64 },
    LockoutReset,
    AuthenticatorId { id: u64 },
    Reconciled(ReconciliationReport),
}

/// Who asked for a cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller, or the driver on its own.
    Caller,

    /// The owning app lost the foreground.
    PolicyVeto,
}

/// How an operation ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum OperationOutcome {
    Success(OperationResult),
    Failed(OperationError),
    Cancelled(CancelReason),
}

impl OperationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, OperationOutcome::Success(_))
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            OperationOutcome::Success(_) => "success",
            OperationOutcome::Failed(_) => "failed",
            OperationOutcome::Cancelled(_) => "cancelled",
        }
    }
}

/// Delivered exactly once per operation, to every observer in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub operation: OperationInfo,
    pub outcome: OperationOutcome,
    /// A cancel was requested before the operation ended, whatever the
    /// outcome turned out to be.
    pub cancel_requested: bool,
}

/// Non-terminal events reported while an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "progress", rename_all = "snake_case")]
pub enum Progress {
    Acquired,
    EnrollmentProgress { remaining: u32 },
    AuthenticationRejected,
}
