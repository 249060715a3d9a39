/// State shared across the HTTP surface. `pool` is `None` in storeless
/// mode, where history and the roster are served from memory.
#[derive(Clone, Default)]
pub struct AppState {
    pub(crate) pool: Option<sqlx::PgPool>,
}
