use colored::Colorize;

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn info(msg: &str) {
    eprintln!("{} {}", "info:".blue().bold(), msg);
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn error(msg: &str) {
    eprintln!("{} {}", "error:".red().bold(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}
