// ── Configuration model ──
//
// Validation of the typed envelope, template materialisation, and drift
// detection against live devices. The envelope types themselves live in
// shellymgr-api (both generation clients translate to and from them).

mod drift;
mod template;
mod validate;

pub use drift::{compare, DriftDetector, DriftPolicy};
pub use template::materialize;
pub use validate::{validate, FieldError, ValidationLevel, ValidationReport};
