pub mod models;
pub mod ontology;

pub use models::{HpoHierarchy, HpoTerm};
pub use ontology::HpoOntologyService;
