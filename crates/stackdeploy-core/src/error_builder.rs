use crate::problemdetails;
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::HashMap;

const PROBLEM_BASE: &str = "https://stackdeploy.dev/probs";

pub struct ErrorBuilder {
    status: StatusCode,
    type_: String,
    title: String,
    detail: String,
    instance: String,
    values: HashMap<String, serde_json::Value>,
}

impl ErrorBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            type_: String::new(),
            title: String::new(),
            detail: String::new(),
            instance: String::new(),
            values: HashMap::new(),
        }
    }

    /// Fill type, title, instance and error code from a problem slug.
    fn kind(status: StatusCode, slug: &str, title: &str) -> Self {
        Self::new(status)
            .type_(format!("{}/{}", PROBLEM_BASE, slug))
            .title(title)
            .instance(format!("/error/{}", slug))
            .value("error_code", slug.replace('-', "_").to_uppercase())
    }

    pub fn type_(mut self, type_: impl Into<String>) -> Self {
        self.type_ = type_.into();
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn value<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.values.insert(key.to_string(), value);
        }
        self
    }

    pub fn build(self) -> problemdetails::Problem {
        let mut problem = problemdetails::new(self.status)
            .with_type(self.type_)
            .with_title(self.title)
            .with_detail(self.detail)
            .with_instance(self.instance)
            .with_value("timestamp", chrono::Utc::now().to_rfc3339());

        for (key, value) in self.values {
            problem = problem.with_value(&key, value);
        }

        problem
    }
}

// Common error builders
pub fn internal_server_error() -> ErrorBuilder {
    ErrorBuilder::kind(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal-server-error",
        "Internal Server Error",
    )
    .detail("An unexpected error occurred while processing your request")
}

pub fn not_found() -> ErrorBuilder {
    ErrorBuilder::kind(StatusCode::NOT_FOUND, "not-found", "Resource Not Found")
}

pub fn unauthorized() -> ErrorBuilder {
    ErrorBuilder::kind(StatusCode::UNAUTHORIZED, "unauthenticated", "Unauthenticated")
        .detail("Authentication is required to access this resource")
}

pub fn bad_request() -> ErrorBuilder {
    ErrorBuilder::kind(StatusCode::BAD_REQUEST, "validation", "Bad Request")
        .detail("The request was malformed or invalid")
}

pub fn conflict() -> ErrorBuilder {
    ErrorBuilder::kind(StatusCode::CONFLICT, "conflict", "Conflict").detail(
        "The request could not be completed due to a conflict with the current state of the resource",
    )
}

/// The payments provider declined the request.
pub fn payment_rejected() -> ErrorBuilder {
    ErrorBuilder::kind(
        StatusCode::PAYMENT_REQUIRED,
        "payment-rejected",
        "Payment Rejected",
    )
}

/// The infrastructure provider refused or failed a provisioning request.
pub fn provisioning_failed() -> ErrorBuilder {
    ErrorBuilder::kind(
        StatusCode::BAD_GATEWAY,
        "provisioning-failed",
        "Provisioning Failed",
    )
}

/// An upstream provider could not be reached.
pub fn transport_error() -> ErrorBuilder {
    ErrorBuilder::kind(
        StatusCode::SERVICE_UNAVAILABLE,
        "transport-error",
        "Upstream Unavailable",
    )
}

pub fn too_many_requests() -> ErrorBuilder {
    ErrorBuilder::kind(
        StatusCode::TOO_MANY_REQUESTS,
        "rate-limited",
        "Too Many Requests",
    )
    .detail("Rate limit exceeded, try again later")
}
