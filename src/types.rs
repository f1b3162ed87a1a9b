/// Composite identity of one entity within one game.
/// Example: `4512_100_Ahri`
pub type Key = String;
/// Identifier for the row source that produced a batch.
/// Examples: `sqlite:games.db`, `memory`
pub type SourceId = String;
/// Name of a relational table holding observations.
/// Examples: `champs`, `champs_cleaned`
pub type TableName = String;
/// Name of a column selected as a feature or used in a filter.
/// Examples: `pos_x`, `normalized_hp`, `time`
pub type ColumnName = String;
/// Rendered filter predicate text, used verbatim in cache keys.
/// Examples: `1=1`, `time > 5 AND name != ''`
pub type FilterText = String;
/// Sweep configuration identity: `(history, horizon)`.
/// Example: `(10, 3)`
pub type ConfigKey = (usize, usize);
