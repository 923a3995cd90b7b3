mod briefing;
mod category;
mod post;

pub use briefing::Briefing;
pub use category::{default_categories, normalize_handle, CategoryDef, MustReadAccount, MUST_READ};
pub use post::{Classification, NewPost, Post};
