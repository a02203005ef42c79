pub const VALIDATION_PREFIX: &str = "VALIDATION/";
pub const STORE_PREFIX: &str = "STORE/";

pub const VALIDATION_REQUIRED: &str = "VALIDATION/REQUIRED";
pub const VALIDATION_RANGE: &str = "VALIDATION/OUT_OF_RANGE";
pub const VALIDATION_INSTALLMENT_PLAN: &str = "VALIDATION/INSTALLMENT_PLAN";
pub const VALIDATION_MONTH_EXISTS: &str = "VALIDATION/MONTH_EXISTS";
pub const VALIDATION_NOT_FOUND: &str = "VALIDATION/NOT_FOUND";
pub const VALIDATION_UNKNOWN_INDEX: &str = "VALIDATION/UNKNOWN_INDEX";
pub const VALIDATION_MISSING_ID: &str = "VALIDATION/MISSING_ID";
pub const VALIDATION_FAMILY_MISMATCH: &str = "VALIDATION/FAMILY_MISMATCH";

pub const STORE_ROW_NOT_FOUND: &str = "STORE/ROW_NOT_FOUND";
pub const STORE_COLUMN_NOT_FOUND: &str = "STORE/COLUMN_NOT_FOUND";
pub const STORE_POOL_TIMEOUT: &str = "STORE/POOL_TIMEOUT";
pub const STORE_CLOSED: &str = "STORE/CLOSED";
pub const STORE_IO: &str = "STORE/IO";
pub const STORE_DATABASE: &str = "STORE/DATABASE";
pub const STORE_DECODE: &str = "STORE/DECODE";
pub const STORE_CORRUPT_ROW: &str = "STORE/CORRUPT_ROW";
pub const STORE_MIGRATION: &str = "STORE/MIGRATION";
pub const STORE_ERROR: &str = "STORE/ERROR";

pub const MAPPER_MISSING_FIELD: &str = "MAPPER/MISSING_FIELD";
pub const MAPPER_INVALID_FIELD: &str = "MAPPER/INVALID_FIELD";
pub const MAPPER_NOT_OBJECT: &str = "MAPPER/NOT_OBJECT";
