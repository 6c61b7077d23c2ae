pub mod cache;
pub mod configuration;
pub mod error;
pub mod executor;
pub mod manager;
mod materializer;
pub mod model;
pub mod object_model;
pub mod parse_helper;
pub mod parser;
pub mod placeholder;
pub mod sql_generator;
pub mod statement;
pub mod type_handler;

pub use cache::{CacheImplementation, CacheKey, CacheModel};
pub use configuration::{FsResourceLoader, MemoryResourceLoader, ResourceLoader, SqlMapXmlConfiguration};
pub use error::{BoxError, Result, SqlMapError};
pub use executor::{Row, SqlExecutor};
pub use manager::{ConnectionSettings, SqlMapManager, SqlMapSession, StatementResult};
pub use model::{
    Discriminator, ParameterMap, ParameterProperty, ResultMap, ResultProperty, SelectKey, Statement,
    StatementKind, SubMap,
};
pub use object_model::{JsonObjectModel, ObjectModel};
pub use statement::{
    Executable, ExecuteListener, ListRowItem, MapRowItem, MappedStatement, PreparedSql,
};
pub use type_handler::{TypeHandler, TypeHandlerRegistry};
