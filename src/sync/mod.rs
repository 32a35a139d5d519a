mod time;

pub(crate) use time::AtomicDuration;
