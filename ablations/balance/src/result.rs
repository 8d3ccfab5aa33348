//! 实验结果.

use crate::profile::Profile;
use std::io::{self, Write};

/// 将 `profile` 的结果写进 `w` 中.
fn describe_into<W: Write>(p: &Profile, w: &mut W) -> io::Result<()> {
    const S4: &str = "    ";

    #[inline]
    fn f64_to_display(f: Option<f64>) -> String {
        match f {
            Some(f) => format!("{f:.3}"),
            None => "/".to_string(),
        }
    }

    #[inline]
    fn u64_to_display(u: Option<u64>) -> String {
        match u {
            Some(u) => u.to_string(),
            None => "/".to_string(),
        }
    }

    writeln!(w, "Policy `{:?}`:", p.get_policy())?;
    writeln!(w, "{S4}Items: {}", p.get_items())?;
    writeln!(w, "{S4}Judgments recorded: {}", p.get_judgments())?;
    writeln!(w, "{S4}Min effective ratings: {}", u64_to_display(p.get_min()))?;
    writeln!(w, "{S4}Max effective ratings: {}", u64_to_display(p.get_max()))?;
    writeln!(w, "{S4}Spread: {}", u64_to_display(p.get_spread()))?;
    writeln!(w, "{S4}Mean: {}", f64_to_display(p.get_mean()))?;
    writeln!(w, "{S4}Std: {}", f64_to_display(p.get_std()))?;
    write!(w, "{S4}Total machine time: {} us", p.get_total_us())?;
    Ok(())
}

/// 消融实验最终结果.
pub struct AblationResult {
    data: Vec<Profile>,
}

impl AblationResult {
    pub fn from_iter<I: IntoIterator<Item = Profile>>(it: I) -> Self {
        Self {
            data: it.into_iter().collect(),
        }
    }

    /// 分析运行结果.
    pub fn analyze(&self) {
        utils::sep();
        let mut buf = Vec::with_capacity(512);

        for profile in self.data.iter() {
            describe_into(profile, &mut buf).unwrap();
            println!("{}", std::str::from_utf8(&buf).unwrap());
            buf.clear();

            utils::sep();
        }
    }
}
