//! Result codes and per-operation error types.
use core::fmt;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( Self::$vname => stringify!($vname), )*
                }
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) recorded by the kernel's
    /// last-error register.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// The task table is full.
        MaxProcess = -1,
        /// The event table is full.
        MaxEvent = -2,
        /// The mutex table is full.
        MaxMutex = -3,
        /// No live slot carries the requested task identifier.
        PidNotFound = -4,
        /// The requested event does not exist, or is already being waited on
        /// by another task.
        EventNotFound = -5,
        /// The requested mutex does not exist.
        MutexNotFound = -6,
        /// An identifier argument was out of the valid range.
        InvalidArg = -7,
        /// The suspension target is dead, already suspended, or owns a mutex.
        SuspendNonrunningTask = -8,
        /// The resumption target is not suspended.
        ResumeNonsuspendedTask = -9,
        /// The signaled event had no waiter. The signal is still recorded,
        /// subject to [`MAX_EVENT_SIG_MISS`](crate::cfg::MAX_EVENT_SIG_MISS).
        SignalUnownedEvent = -10,
        /// The operation requires a started kernel.
        KernelInactive = -11,
        /// Reserved for request codes the service loop does not recognize.
        /// The typed [`Request`](crate::Request) enum cannot produce one; a
        /// raw trap ABI could.
        InvalidKernelRequest = -12,
    }
}

/// Defines a per-operation error type convertible to [`ResultCode`] and
/// reconstructible from one (used by the syscall wrappers to turn a reply
/// code back into the operation's typed error).
macro_rules! define_op_error {
    (
        $( #[$meta:meta] )*
        pub enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[$meta] )*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $Name {
            $( $Variant, )*
        }

        impl From<$Name> for ResultCode {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant, )*
                }
            }
        }

        impl $Name {
            /// Map a reply code back to this operation's error, if it is one.
            pub fn from_code(code: ResultCode) -> Option<Self> {
                match code {
                    $( ResultCode::$Variant => Some(Self::$Variant), )*
                    _ => None,
                }
            }
        }
    };
}

define_op_error! {
    /// Error type for task creation.
    pub enum CreateTaskError {
        MaxProcess,
    }
}

define_op_error! {
    /// Error type for task suspension.
    pub enum SuspendTaskError {
        PidNotFound,
        SuspendNonrunningTask,
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for task resumption.
    pub enum ResumeTaskError {
        PidNotFound,
        ResumeNonsuspendedTask,
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for sleeping.
    pub enum SleepError {
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for yielding.
    pub enum YieldError {
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for event creation.
    pub enum CreateEventError {
        MaxEvent,
    }
}

define_op_error! {
    /// Error type for waiting on an event.
    pub enum WaitEventError {
        InvalidArg,
        EventNotFound,
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for signaling an event.
    ///
    /// `SignalUnownedEvent` is a soft warning: the pending count was still
    /// recorded and a later wait will consume it.
    pub enum SignalEventError {
        InvalidArg,
        EventNotFound,
        PidNotFound,
        SignalUnownedEvent,
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for mutex creation.
    pub enum CreateMutexError {
        MaxMutex,
    }
}

define_op_error! {
    /// Error type for locking a mutex.
    pub enum LockMutexError {
        InvalidArg,
        MutexNotFound,
        KernelInactive,
    }
}

define_op_error! {
    /// Error type for unlocking a mutex.
    ///
    /// An unlock by a task that is not the owner is rejected silently (no
    /// error code), so it is not represented here.
    pub enum UnlockMutexError {
        InvalidArg,
        MutexNotFound,
        KernelInactive,
    }
}
