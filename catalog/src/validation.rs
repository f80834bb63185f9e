use crate::domain::{ProductDraft, ProductId};

const MAX_ID_LEN: usize = 64;
const MAX_NAME_LEN: usize = 250;
const MAX_CATEGORY_LEN: usize = 250;
const MAX_DESCRIPTION_LEN: usize = 5000;
const MAX_QUERY_LEN: usize = 200;

#[derive(Debug, PartialEq)]
pub enum ValidationError {
    MissingRequiredField { field: &'static str },
    TooLong { field: &'static str, max: usize },
    InvalidId { reason: &'static str },
    InvalidPrice(f64),
    IdMismatch { path: String, body: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingRequiredField { field } => {
                write!(f, "Missing required field '{}'", field)
            }
            ValidationError::TooLong { field, max } => {
                write!(f, "Field '{}' exceeds {} characters", field, max)
            }
            ValidationError::InvalidId { reason } => write!(f, "Invalid product id: {}", reason),
            ValidationError::InvalidPrice(price) => {
                write!(f, "Invalid price {}: must be a finite, non-negative number", price)
            }
            ValidationError::IdMismatch { path, body } => {
                write!(f, "Product id '{}' does not match '{}'", body, path)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for shared::Error {
    fn from(err: ValidationError) -> Self {
        shared::Error::Validation(err.to_string())
    }
}

pub fn validate_id(id: &ProductId) -> Result<(), ValidationError> {
    let raw = id.as_str();
    if raw.is_empty() {
        return Err(ValidationError::InvalidId {
            reason: "id cannot be empty",
        });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(ValidationError::InvalidId {
            reason: "id exceeds 64 characters",
        });
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidId {
            reason: "id must contain only alphanumeric characters, hyphens, or underscores",
        });
    }
    Ok(())
}

pub fn validate_draft(draft: &ProductDraft) -> Result<(), ValidationError> {
    if let Some(id) = &draft.id {
        validate_id(id)?;
    }

    if draft.name.trim().is_empty() {
        return Err(ValidationError::MissingRequiredField { field: "name" });
    }
    check_len("name", &draft.name, MAX_NAME_LEN)?;
    check_len("category", &draft.category, MAX_CATEGORY_LEN)?;
    check_len("description", &draft.description, MAX_DESCRIPTION_LEN)?;

    if !draft.price.is_finite() || draft.price < 0.0 {
        return Err(ValidationError::InvalidPrice(draft.price));
    }

    Ok(())
}

/// A replacement body may repeat the id, but it must name the same product.
pub fn validate_replacement(id: &ProductId, draft: &ProductDraft) -> Result<(), ValidationError> {
    validate_id(id)?;
    if let Some(body_id) = &draft.id {
        if body_id != id {
            return Err(ValidationError::IdMismatch {
                path: id.to_string(),
                body: body_id.to_string(),
            });
        }
    }
    validate_draft(draft)
}

pub fn validate_query(query: &str) -> Result<(), ValidationError> {
    check_len("q", query, MAX_QUERY_LEN)
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::TooLong { field, max });
    }
    Ok(())
}
