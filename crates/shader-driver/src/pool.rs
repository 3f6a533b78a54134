use std::{
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

///Fixed size pool of compiler threads fed through a channel.
///
/// Only the precompiles of new shaders go through here, draw time compiles run on the calling thread.
pub struct CompilePool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Vec<JoinHandle<()>>,
}

impl CompilePool {
    ///Starts `threads` workers. With zero threads, jobs run inline on the scheduling thread.
    pub fn new(threads: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let mut workers = Vec::with_capacity(threads);
        for idx in 0..threads {
            let receiver = receiver.clone();
            let spawned = thread::Builder::new()
                .name(format!("shader compiler {}", idx))
                .spawn(move || loop {
                    let next = receiver.lock().unwrap_or_else(PoisonError::into_inner).recv();
                    match next {
                        Ok(job) => job(),
                        Err(_) => break,
                    }
                });

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    log::warn!("Could not start compiler thread {}: {}", idx, e);
                    break;
                }
            }
        }

        log::info!("Started {} shader compiler threads", workers.len());

        CompilePool {
            sender: Mutex::new(if workers.is_empty() { None } else { Some(sender) }),
            workers,
        }
    }

    pub fn num_threads(&self) -> usize {
        self.workers.len()
    }

    pub fn schedule(&self, job: Job) {
        let job = {
            let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
            match sender.as_ref() {
                Some(sender) => match sender.send(job) {
                    Ok(()) => return,
                    Err(mpsc::SendError(job)) => job,
                },
                None => job,
            }
        };

        job();
    }
}

impl Drop for CompilePool {
    fn drop(&mut self) {
        //Closing the channel ends the worker loops once the queue is drained.
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            //The last reference may be dropped by a job on one of our own threads.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                log::error!("Shader compiler thread panicked");
            }
        }
    }
}
