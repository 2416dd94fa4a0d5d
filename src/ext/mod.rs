mod byte_size_ext;
mod path_ext;

pub use byte_size_ext::ByteSizeExt;
pub use path_ext::BestEffortPathExt;
