mod clock;

pub(crate) use clock::Clock;
pub(crate) use clock::RealClock;

#[cfg(test)]
pub(crate) use clock::mocked_clock;
#[cfg(test)]
pub(crate) use clock::MockClock;
#[cfg(test)]
pub(crate) use clock::MockClockController;
