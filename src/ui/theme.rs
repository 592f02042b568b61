use owo_colors::Style;
use std::sync::OnceLock;

static THEME: OnceLock<Theme> = OnceLock::new();

/// Styles for the CLI's output roles.
#[derive(Debug, Clone)]
pub struct Theme {
    /// Section titles
    pub header: Style,
    pub success: Style,
    pub error: Style,
    pub warn: Style,
    /// Labels and the info icon
    pub info: Style,
    /// Secondary text and empty placeholders
    pub dim: Style,
    /// Ids and counts
    pub accent: Style,
}

impl Theme {
    /// Colored only when stdout is a terminal and colors are not disabled
    /// (`NO_COLOR`, `CLICOLOR=0`).
    pub fn detect() -> Self {
        Self::with_colors(console::Term::stdout().is_term() && console::colors_enabled())
    }

    pub fn with_colors(enabled: bool) -> Self {
        if !enabled {
            return Self {
                header: Style::new(),
                success: Style::new(),
                error: Style::new(),
                warn: Style::new(),
                info: Style::new(),
                dim: Style::new(),
                accent: Style::new(),
            };
        }
        Self {
            header: Style::new().cyan().bold(),
            success: Style::new().green().bold(),
            error: Style::new().red().bold(),
            warn: Style::new().yellow().bold(),
            info: Style::new().magenta(),
            dim: Style::new().white().dimmed(),
            accent: Style::new().bright_blue().bold(),
        }
    }
}

pub fn theme() -> &'static Theme {
    THEME.get_or_init(Theme::detect)
}
