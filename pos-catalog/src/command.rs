use pos_api::CatalogResource;
use std::str::FromStr;

pub const USAGE: &str = "usage: pos-catalog [load|refetch|clear|purge] [products|categories|subcategories|extras|all]";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Show the cached list, then refresh it
    Load,
    /// Drop the cached list and fetch it again
    Refetch,
    /// Drop cached lists
    Clear,
    /// Drop expired or unreadable lists
    Purge,
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "load" => Ok(Action::Load),
            "refetch" | "refresh" => Ok(Action::Refetch),
            "clear" => Ok(Action::Clear),
            "purge" => Ok(Action::Purge),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub action: Action,
    /// `None` targets every catalog slot
    pub resource: Option<CatalogResource>,
}

impl Invocation {
    pub fn parse<I, S>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();

        let action = match args.next() {
            Some(raw) => raw.as_ref().parse()?,
            None => Action::Load,
        };

        let resource = match args.next() {
            Some(raw) if raw.as_ref().eq_ignore_ascii_case("all") => None,
            Some(raw) => Some(raw.as_ref().parse()?),
            // Single-list actions default to the product catalog
            None => match action {
                Action::Load | Action::Refetch => Some(CatalogResource::Products),
                Action::Clear | Action::Purge => None,
            },
        };

        if let Some(extra) = args.next() {
            return Err(format!("unexpected argument '{}'", extra.as_ref()));
        }

        Ok(Self { action, resource })
    }
}
