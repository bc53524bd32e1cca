mod template;

pub(crate) use template::TemplateTable;
pub use template::{TemplateRecord, next_template_name};
