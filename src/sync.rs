#[cfg(feature = "sync")]
pub(crate) use spin::Mutex;

#[cfg(feature = "sync")]
pub(crate) type Shared<T> = alloc::sync::Arc<Mutex<T>>;
#[cfg(not(feature = "sync"))]
pub(crate) type Shared<T> = alloc::rc::Rc<core::cell::RefCell<T>>;

pub(crate) fn shared<T>(t: T) -> Shared<T> {
    match () {
        #[cfg(feature = "sync")]
        () => alloc::sync::Arc::new(Mutex::new(t)),
        #[cfg(not(feature = "sync"))]
        () => alloc::rc::Rc::new(core::cell::RefCell::new(t)),
    }
}

pub(crate) fn try_unwrap<T>(shared: Shared<T>) -> Result<T, Shared<T>> {
    match () {
        #[cfg(feature = "sync")]
        () => alloc::sync::Arc::try_unwrap(shared).map(|mutex| mutex.into_inner()),
        #[cfg(not(feature = "sync"))]
        () => alloc::rc::Rc::try_unwrap(shared).map(|cell| cell.into_inner()),
    }
}

macro_rules! acquire {
    ($shared: expr) => {
        match () {
            #[cfg(feature = "sync")]
            () => $shared.lock(),
            #[cfg(not(feature = "sync"))]
            () => $shared.borrow_mut(),
        }
    };
}

pub(crate) use acquire;
