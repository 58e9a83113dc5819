use console::style;

pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", style("✓").green(), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", style("✗").red(), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", style("⚠").yellow(), message);
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", style("ℹ").blue(), message);
    }

    /// Progress lines go to stderr so stdout stays parseable JSON
    pub fn progress(&self, line: &str) {
        eprintln!("{}", line);
    }

    pub fn header(&self, message: &str) {
        println!("\n{}", style(message).bold().underlined());
    }

    pub fn section(&self, message: &str) {
        println!("\n{}", style(message).bold());
        println!("{}", "─".repeat(40));
    }

    pub fn field(&self, label: &str, value: &str) {
        println!("  {:<10} {}", style(label).dim(), value);
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
