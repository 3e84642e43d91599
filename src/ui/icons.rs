pub struct Icons;

impl Icons {
    pub const ROCKET: &str = "🚀";
    pub const CHECK: &str = "✅";
    pub const CROSS: &str = "❌";
    pub const WARN: &str = "⚠️";
    pub const LINK: &str = "🔗";
    pub const PACKAGE: &str = "📦";
    pub const FOLDER: &str = "📂";
    pub const DATABASE: &str = "🗄️";
    pub const CLOCK: &str = "⏱️";
}
