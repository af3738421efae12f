#![warn(warnings)]
#![deny(clippy::all)]

//! Storage-backed core of a forms application: versioned form structure
//! (forms, index versions, pages, fields, groups) and export of submitted
//! entries to xlsx, csv, json and zip bundles.

pub mod assignment;
pub mod catalog;
pub mod category;
pub mod class_registry;
pub mod config;
pub mod datasource;
pub mod duplicate;
pub mod entry;
pub mod error;
pub mod export;
pub mod field;
pub mod form;
pub mod group;
pub mod ids;
pub mod integrity;
pub mod page;
pub mod storage;
pub mod uow;
pub mod users;
pub mod version;

pub use class_registry::{ClassRegistry, ClassSchema, MemoryClassRegistry};
pub use config::{BumpPolicy, EngineConfig, PageNamePolicy};
pub use duplicate::duplicate_form;
pub use entry::{Entry, NewEntry, Timestamp};
pub use error::{FormError, Result};
pub use export::{
    build_field_catalog, dataframe_for_form, excel_bytes_for_form, export_bytes, flatten_entry,
    sanitize_filename, to_naive_local, zip_export, ExportFile, ExportFormat, Frame,
};
pub use field::{add_field_to_page, Field, FieldClass, NewField};
pub use form::{create_form, suspend, Form, FormState, NewForm};
pub use ids::{uuid32, uuid32_no_dashes};
pub use page::{add_page, NewPage, PageCreated};
pub use uow::UnitOfWork;
