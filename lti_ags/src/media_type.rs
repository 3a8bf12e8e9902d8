//! Media types used by the Assignment and Grading Services endpoints

/// A single lineitem
pub const LINEITEM: &str = "application/vnd.ims.lis.v2.lineitem+json";

/// A collection of lineitems
pub const LINEITEM_CONTAINER: &str = "application/vnd.ims.lis.v2.lineitemcontainer+json";

/// A score submitted to a lineitem
pub const SCORE: &str = "application/vnd.ims.lis.v1.score+json";

/// A collection of results for a lineitem
pub const RESULT_CONTAINER: &str = "application/vnd.ims.lis.v2.resultcontainer+json";
