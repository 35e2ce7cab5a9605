pub(crate) mod assignments;
pub(crate) mod errors;
pub(crate) mod evaluations;
pub(crate) mod handlers;
pub(crate) mod router;
pub(crate) mod uploads;
pub(crate) mod validation;
