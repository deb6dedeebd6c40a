mod article;
mod bias_pair;
mod site;
mod target;

pub use article::Article;
pub use bias_pair::{BiasPair, NewBiasPair};
pub use site::{normalize_site, Side, Site};
pub use target::FeedTarget;
