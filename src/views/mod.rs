//! View boundary: loaders that fetch through the collaborators, settle every
//! failure into one `AppError`, and authorize only once the data is in hand.

mod scope;
mod property;
mod ml_admin;

pub use scope::{ViewScope, ViewState};
pub use property::{load_property_detail, load_property_edit, save_property_edit, PropertyDetailView, PropertyEditView};
pub use ml_admin::{load_ml_panel, retrain_model, MlPanelView};
