mod object;
mod verb;

pub(crate) use object::Object;
pub(crate) use verb::Verb;
