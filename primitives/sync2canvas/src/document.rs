/// A page as fetched from the source API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub title: String,
    /// Storage-format markup (XHTML with `ac:`/`ri:` elements).
    pub raw_markup: String,
    pub author_name: String,
}
